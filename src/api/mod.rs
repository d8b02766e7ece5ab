//! HTTP API for listings, marketplace writes, and health checks
//!
//! This is the boundary where failures are logged and turned into responses.
//! Submissions are bounded by `relayer.request_timeout_secs`. A submission cut
//! off after it reached the broadcast step is reported as possibly pending; one
//! cut off earlier (e.g. queued behind another for the same account) sent nothing.

use crate::cache::ListingCache;
use crate::chain::ChainClient;
use crate::config::ApiConfig;
use crate::contract::{ContractCall, Listing};
use crate::error::{
    CacheReadError, MarketError, MarketResult, PipelineError, PipelineStep, SubmissionOutcome,
};
use crate::metrics;
use crate::tx::{Receipt, SubmissionProgress, TransactionPipeline};
use crate::wallet::Account;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TransactionPipeline>,
    pub cache: Arc<ListingCache>,
    pub account: Account,
    pub contract: Address,
    pub client: Arc<dyn ChainClient>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/listings", get(get_listings).post(list_item))
        .route("/listings/create", post(create_listing))
        .route("/items/:id/buy", post(buy_item))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> MarketResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MarketError::Server(format!("failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| MarketError::Server(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the RPC endpoint answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.client.block_number().await {
        Ok(block) => {
            metrics::record_health_check();
            (
                StatusCode::OK,
                Json(ReadinessResponse {
                    ready: true,
                    chain_id: state.client.chain_id(),
                    block_number: Some(block),
                    account: format!("{:?}", state.account.address()),
                }),
            )
        }
        Err(e) => {
            metrics::record_health_check_failure();
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    chain_id: state.client.chain_id(),
                    block_number: None,
                    account: format!("{:?}", state.account.address()),
                }),
            )
        }
    }
}

/// Current listings; falls back to the last good read when a refresh fails
async fn get_listings(State(state): State<AppState>) -> Result<Json<ListingsResponse>, ApiError> {
    match state.cache.get().await {
        Ok(listings) => {
            let fetched_at = state.cache.cached().await.map(|entry| entry.fetched_at);
            Ok(Json(ListingsResponse {
                listings: listings.as_ref().clone(),
                fetched_at,
                stale: false,
            }))
        }
        Err(e) => match state.cache.cached().await {
            Some(entry) => {
                warn!("Listing refresh failed, serving entry from {}: {}", entry.fetched_at, e);
                Ok(Json(ListingsResponse {
                    listings: entry.listings.as_ref().clone(),
                    fetched_at: Some(entry.fetched_at),
                    stale: true,
                }))
            }
            None => {
                error!("Listing read failed: {}", e);
                Err(ApiError::Read(e))
            }
        },
    }
}

async fn list_item(
    State(state): State<AppState>,
    Json(req): Json<ListingRequest>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let (target, token_id, price) = req.parse(state.contract)?;
    submit(&state, ContractCall::list_item(target, token_id, price)).await
}

async fn create_listing(
    State(state): State<AppState>,
    Json(req): Json<ListingRequest>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let (target, token_id, price) = req.parse(state.contract)?;
    submit(&state, ContractCall::create_listing(target, token_id, price)).await
}

async fn buy_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<BuyRequest>>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let item_id = parse_uint("item id", &id)?;
    let mut call = ContractCall::buy_item(state.contract, item_id);

    if let Some(raw) = body.and_then(|Json(req)| req.value) {
        call = call.with_value(parse_price(&raw)?);
    }

    submit(&state, call).await
}

async fn submit(state: &AppState, call: ContractCall) -> Result<Json<ReceiptResponse>, ApiError> {
    let method = call.method().name();
    metrics::record_tx_submitted(method);
    let started = Instant::now();
    let progress = SubmissionProgress::default();

    let result = tokio::time::timeout(
        state.request_timeout,
        state.pipeline.submit_tracked(call, &state.account, &progress),
    )
    .await;

    match result {
        Ok(Ok(receipt)) => {
            metrics::record_tx_latency(method, started.elapsed().as_secs_f64());
            metrics::record_tx_included(method, receipt.success);
            if receipt.success {
                info!("{} included: {:?}", method, receipt.tx_hash);
            } else {
                warn!("{} reverted on chain: {:?}", method, receipt.tx_hash);
            }
            Ok(Json(ReceiptResponse::from(&receipt)))
        }
        Ok(Err(e)) => {
            metrics::record_tx_failed(&e);
            error!(
                step = e.step().as_str(),
                kind = e.kind(),
                retryable = e.is_retryable(),
                "{} failed: {}",
                method,
                e
            );
            Err(ApiError::Submission(e))
        }
        Err(_) => {
            let broadcast = progress.broadcast_started();
            if broadcast {
                // A payload may be pending; the next lease must re-read the chain.
                // Another submission may hold the lease, so do not wait for it here.
                let sequencer = state.pipeline.sequencer().clone();
                let account = state.account.address();
                tokio::spawn(async move { sequencer.invalidate(account).await });
            }
            metrics::record_tx_timed_out(broadcast);
            warn!(
                broadcast,
                "{} did not finish within {:?}",
                method, state.request_timeout
            );
            Err(ApiError::TimedOut {
                limit: state.request_timeout,
                broadcast,
            })
        }
    }
}

fn parse_uint(field: &str, raw: &str) -> Result<U256, ApiError> {
    U256::from_dec_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("{} must be a decimal integer, got {:?}", field, raw)))
}

/// ETH amount as a decimal string, e.g. "2.5"
fn parse_price(raw: &str) -> Result<U256, ApiError> {
    parse_ether(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("price must be an ETH amount, got {:?}", raw)))
}

// Request types

#[derive(Deserialize)]
struct ListingRequest {
    token_id: String,
    /// ETH
    price: String,
    /// Token contract to list from; defaults to the marketplace contract
    #[serde(default)]
    contract_address: Option<String>,
}

impl ListingRequest {
    fn parse(&self, default_target: Address) -> Result<(Address, U256, U256), ApiError> {
        let target = match self.contract_address.as_deref().map(str::trim) {
            None | Some("") => default_target,
            Some(raw) => raw.parse().map_err(|_| {
                ApiError::BadRequest(format!("contract_address is not an address: {:?}", raw))
            })?,
        };
        Ok((
            target,
            parse_uint("token_id", &self.token_id)?,
            parse_price(&self.price)?,
        ))
    }
}

#[derive(Deserialize, Default)]
struct BuyRequest {
    /// ETH to attach to the purchase
    #[serde(default)]
    value: Option<String>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chain_id: u64,
    block_number: Option<u64>,
    account: String,
}

#[derive(Serialize)]
struct ListingsResponse {
    listings: Vec<Listing>,
    fetched_at: Option<DateTime<Utc>>,
    stale: bool,
}

#[derive(Serialize)]
struct ReceiptResponse {
    tx_hash: String,
    success: bool,
    block_number: Option<u64>,
    method: &'static str,
    nonce: u64,
}

impl From<&Receipt> for ReceiptResponse {
    fn from(receipt: &Receipt) -> Self {
        Self {
            tx_hash: format!("{:?}", receipt.tx_hash),
            success: receipt.success,
            block_number: receipt.block_number,
            method: receipt.call.method().name(),
            nonce: receipt.nonce,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    step: Option<&'static str>,
    classification: &'static str,
    outcome: Option<SubmissionOutcome>,
    retryable: bool,
    message: String,
}

enum ApiError {
    BadRequest(String),
    Submission(PipelineError),
    TimedOut { limit: Duration, broadcast: bool },
    Read(CacheReadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    step: None,
                    classification: "invalid_request",
                    outcome: Some(SubmissionOutcome::NothingHappened),
                    retryable: false,
                    message,
                },
            ),
            ApiError::Submission(e) => {
                let outcome = e.outcome();
                let status = match outcome {
                    SubmissionOutcome::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
                    SubmissionOutcome::MaybeHappened => StatusCode::BAD_GATEWAY,
                    SubmissionOutcome::NothingHappened if e.is_retryable() => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SubmissionOutcome::NothingHappened => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (
                    status,
                    ErrorResponse {
                        step: Some(e.step().as_str()),
                        classification: e.kind(),
                        outcome: Some(outcome),
                        retryable: e.is_retryable(),
                        message: e.to_string(),
                    },
                )
            }
            ApiError::TimedOut {
                limit,
                broadcast: true,
            } => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorResponse {
                    step: Some(PipelineStep::Broadcast.as_str()),
                    classification: "unknown",
                    outcome: Some(SubmissionOutcome::MaybeHappened),
                    retryable: false,
                    message: format!(
                        "submission did not finish within {:?}; check the account's transactions before retrying",
                        limit
                    ),
                },
            ),
            ApiError::TimedOut {
                limit,
                broadcast: false,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    step: None,
                    classification: "timeout",
                    outcome: Some(SubmissionOutcome::NothingHappened),
                    retryable: true,
                    message: format!(
                        "submission did not reach the network within {:?}; nothing was sent",
                        limit
                    ),
                },
            ),
            ApiError::Read(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    step: None,
                    classification: match e {
                        CacheReadError::Network(_) => "network",
                        CacheReadError::Decode(_) => "decode",
                    },
                    outcome: None,
                    retryable: matches!(e, CacheReadError::Network(_)),
                    message: e.to_string(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MockListingSource, SystemClock};
    use crate::chain::MockChainClient;
    use crate::error::{BroadcastError, RpcError};
    use crate::tx::{
        Broadcast, GasQuote, MockBroadcast, MockEstimateGas, MockSignTransaction, NonceSequencer,
        SignedTransaction,
    };
    use crate::wallet::MockAccountCapability;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ethers::types::{Bytes, H256};
    use serde_json::Value;
    use tower::ServiceExt;

    fn chain() -> Arc<dyn ChainClient> {
        let mut client = MockChainClient::new();
        client.expect_transaction_count().returning(|_| Ok(7));
        client.expect_chain_id().return_const(31337u64);
        client.expect_block_number().returning(|| Ok(100));
        Arc::new(client)
    }

    fn estimator() -> MockEstimateGas {
        let mut estimator = MockEstimateGas::new();
        estimator.expect_estimate().returning(|_, _| {
            Ok(GasQuote {
                gas_limit: U256::from(21_000),
                gas_price: U256::one(),
            })
        });
        estimator
    }

    fn signer() -> MockSignTransaction {
        let mut signer = MockSignTransaction::new();
        signer.expect_sign().returning(|call, quote, nonce, _| {
            Ok(SignedTransaction {
                raw: Bytes::from(vec![0x01]),
                hash: H256::from_low_u64_be(nonce),
                call: call.clone(),
                nonce,
                quote: quote.clone(),
            })
        });
        signer
    }

    fn state(broadcaster: Arc<dyn Broadcast>, source: MockListingSource) -> AppState {
        let client = chain();
        AppState {
            pipeline: Arc::new(TransactionPipeline::new(
                Arc::new(estimator()),
                Arc::new(NonceSequencer::new(client.clone())),
                Arc::new(signer()),
                broadcaster,
            )),
            cache: Arc::new(ListingCache::new(
                Arc::new(source),
                Arc::new(SystemClock),
                Duration::from_secs(300),
            )),
            account: Account::new(
                Address::repeat_byte(0x0a),
                Arc::new(MockAccountCapability::new()),
            ),
            contract: Address::repeat_byte(0x42),
            client,
            request_timeout: Duration::from_millis(200),
        }
    }

    fn including() -> Arc<dyn Broadcast> {
        let mut broadcaster = MockBroadcast::new();
        broadcaster.expect_send().returning(|tx| {
            Ok(Receipt {
                tx_hash: tx.hash,
                success: true,
                block_number: Some(101),
                call: tx.call.clone(),
                nonce: tx.nonce,
            })
        });
        Arc::new(broadcaster)
    }

    fn listing() -> Listing {
        Listing {
            id: "1".into(),
            title: "Genesis".into(),
            image: "ipfs://1".into(),
            price: 2.5,
            price_wei: parse_ether("2.5").unwrap(),
        }
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_get_listings() {
        let mut source = MockListingSource::new();
        source
            .expect_fetch_listings()
            .times(1)
            .returning(|| Ok(vec![listing()]));
        let app = router(state(including(), source));

        let (status, body) = call(app, "GET", "/listings", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stale"], false);
        assert_eq!(body["listings"][0]["id"], "1");
        assert_eq!(body["listings"][0]["price"], 2.5);
    }

    #[tokio::test]
    async fn test_listing_read_failure_without_cache() {
        let mut source = MockListingSource::new();
        source.expect_fetch_listings().returning(|| {
            Err(CacheReadError::Network(RpcError::Transport(
                "connection refused".into(),
            )))
        });
        let app = router(state(including(), source));

        let (status, body) = call(app, "GET", "/listings", None).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["classification"], "network");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_buy_item_returns_receipt() {
        let app = router(state(including(), MockListingSource::new()));

        let (status, body) = call(app, "POST", "/items/42/buy", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "buyItem");
        assert_eq!(body["nonce"], 7);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_create_listing_parses_eth_price() {
        let mut broadcaster = MockBroadcast::new();
        broadcaster
            .expect_send()
            .withf(|tx| {
                tx.call.args().to_vec()
                    == vec![
                        ethers::abi::Token::Uint(U256::from(5)),
                        ethers::abi::Token::Uint(parse_ether("0.25").unwrap()),
                    ]
            })
            .times(1)
            .returning(|tx| {
                Ok(Receipt {
                    tx_hash: tx.hash,
                    success: true,
                    block_number: Some(101),
                    call: tx.call.clone(),
                    nonce: tx.nonce,
                })
            });
        let app = router(state(Arc::new(broadcaster), MockListingSource::new()));

        let (status, body) = call(
            app,
            "POST",
            "/listings/create",
            Some(r#"{"token_id": "5", "price": "0.25"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "createListing");
    }

    #[tokio::test]
    async fn test_bad_item_id_is_rejected_before_submission() {
        let mut broadcaster = MockBroadcast::new();
        broadcaster.expect_send().never();
        let app = router(state(Arc::new(broadcaster), MockListingSource::new()));

        let (status, body) = call(app, "POST", "/items/abc/buy", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["classification"], "invalid_request");
    }

    #[tokio::test]
    async fn test_rejected_broadcast_body() {
        let mut broadcaster = MockBroadcast::new();
        broadcaster.expect_send().times(1).returning(|_| {
            Err(BroadcastError::from_submission(RpcError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".into(),
            }))
        });
        let app = router(state(Arc::new(broadcaster), MockListingSource::new()));

        let (status, body) = call(app, "POST", "/items/42/buy", None).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["step"], "broadcast");
        assert_eq!(body["classification"], "rejected");
        assert_eq!(body["outcome"], "rejected");
        assert_eq!(body["retryable"], false);
    }

    struct HangingBroadcast;

    #[async_trait::async_trait]
    impl Broadcast for HangingBroadcast {
        async fn send(&self, _tx: &SignedTransaction) -> Result<Receipt, BroadcastError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(BroadcastError::unknown("unreachable in tests"))
        }
    }

    #[tokio::test]
    async fn test_deadline_reports_unknown_outcome() {
        let app = router(state(Arc::new(HangingBroadcast), MockListingSource::new()));

        let (status, body) = call(app, "POST", "/items/42/buy", None).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["step"], "broadcast");
        assert_eq!(body["classification"], "unknown");
        assert_eq!(body["outcome"], "maybe_happened");
    }

    #[tokio::test]
    async fn test_deadline_while_queued_sent_nothing() {
        let mut estimator = MockEstimateGas::new();
        estimator.expect_estimate().never();
        let mut state = state(including(), MockListingSource::new());
        state.pipeline = Arc::new(TransactionPipeline::new(
            Arc::new(estimator),
            state.pipeline.sequencer().clone(),
            Arc::new(signer()),
            including(),
        ));
        state.request_timeout = Duration::from_millis(100);

        // another submission for the same account holds the lease throughout
        let _held = state
            .pipeline
            .sequencer()
            .lease(state.account.address())
            .await;
        let app = router(state);

        let (status, body) = tokio::time::timeout(
            Duration::from_secs(2),
            call(app, "POST", "/items/42/buy", None),
        )
        .await
        .expect("deadline response must not wait for the lease");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["classification"], "timeout");
        assert_eq!(body["outcome"], "nothing_happened");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_last_listings_as_stale() {
        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = reads.clone();
        let mut source = MockListingSource::new();
        source.expect_fetch_listings().returning(move || {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(vec![listing()])
            } else {
                Err(CacheReadError::Network(RpcError::Transport(
                    "connection refused".into(),
                )))
            }
        });
        let mut state = state(including(), MockListingSource::new());
        // every entry is already past its TTL on the next read
        state.cache = Arc::new(ListingCache::new(
            Arc::new(source),
            Arc::new(SystemClock),
            Duration::ZERO,
        ));
        let app = router(state);

        let (status, fresh) = call(app.clone(), "GET", "/listings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fresh["stale"], false);

        let (status, body) = call(app, "GET", "/listings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stale"], true);
        assert_eq!(body["listings"][0]["id"], "1");
        assert_eq!(body["fetched_at"], fresh["fetched_at"]);
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_reports_block() {
        let app = router(state(including(), MockListingSource::new()));

        let (status, body) = call(app, "GET", "/ready", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["block_number"], 100);
        assert_eq!(body["chain_id"], 31337);
    }
}
