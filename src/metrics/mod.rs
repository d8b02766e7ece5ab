//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions per method and their latency
//! - Failures per pipeline step and error kind
//! - Listing cache hits, misses and refresh failures

use crate::error::{MarketError, MarketResult, PipelineError};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Submission metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "marketplace_transactions_submitted_total",
        "Total submissions started by method",
        &["method"]
    ).unwrap();

    pub static ref TX_INCLUDED: CounterVec = register_counter_vec!(
        "marketplace_transactions_included_total",
        "Total transactions included, by method and execution status",
        &["method", "status"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "marketplace_transactions_failed_total",
        "Total failed submissions by pipeline step and error kind",
        &["step", "kind"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "marketplace_transaction_latency_seconds",
        "Time from submission to receipt",
        &["method"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Cache metrics
    pub static ref CACHE_REQUESTS: CounterVec = register_counter_vec!(
        "marketplace_listing_cache_requests_total",
        "Listing cache lookups by result",
        &["result"]
    ).unwrap();

    pub static ref CACHE_REFRESH_FAILURES: CounterVec = register_counter_vec!(
        "marketplace_listing_cache_refresh_failures_total",
        "Failed listing refreshes",
        &[]
    ).unwrap();

    pub static ref LISTINGS: Gauge = register_gauge!(
        "marketplace_listings",
        "Listings in the last successful refresh"
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "marketplace_health_check_success_total",
        "Total successful readiness checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "marketplace_health_check_failure_total",
        "Total failed readiness checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> MarketResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| MarketError::Server(format!("failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| MarketError::Server(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_tx_submitted(method: &str) {
    TX_SUBMITTED.with_label_values(&[method]).inc();
}

pub fn record_tx_included(method: &str, success: bool) {
    let status = if success { "success" } else { "reverted" };
    TX_INCLUDED.with_label_values(&[method, status]).inc();
}

pub fn record_tx_failed(err: &PipelineError) {
    TX_FAILED
        .with_label_values(&[err.step().as_str(), err.kind()])
        .inc();
}

/// Submissions cut off by the request deadline, before or after broadcast began
pub fn record_tx_timed_out(broadcast: bool) {
    let step = if broadcast { "broadcast" } else { "queued" };
    TX_FAILED.with_label_values(&[step, "timeout"]).inc();
}

pub fn record_tx_latency(method: &str, latency_secs: f64) {
    TX_LATENCY.with_label_values(&[method]).observe(latency_secs);
}

pub fn record_cache_hit() {
    CACHE_REQUESTS.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    CACHE_REQUESTS.with_label_values(&["miss"]).inc();
}

pub fn record_cache_refresh_failure() {
    CACHE_REFRESH_FAILURES.with_label_values(&[]).inc();
}

pub fn record_listings(count: usize) {
    LISTINGS.set(count as f64);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
