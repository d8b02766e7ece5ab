//! Marketplace Relayer - NFT marketplace transaction submission service
//!
//! Submits marketplace writes (list, create, buy) through a gas → nonce → sign →
//! broadcast pipeline and serves the contract's current listings from a TTL cache.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod cache;
mod chain;
mod config;
mod contract;
mod error;
mod metrics;
mod tx;
mod wallet;

use cache::{ContractListingSource, ListingCache, SystemClock};
use chain::{ChainClient, ChainProvider};
use config::Settings;
use metrics::MetricsServer;
use tx::{ChainBroadcaster, GasEstimator, NonceSequencer, TransactionPipeline, TransactionSigner};
use wallet::{Account, LocalWalletCapability};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Marketplace Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} on chain {}",
        settings.relayer.instance_id, settings.rpc.chain_id
    );

    let contract = settings.marketplace.contract_address()?;

    // Chain connection
    let client: Arc<dyn ChainClient> = Arc::new(
        ChainProvider::new(&settings.rpc)
            .await
            .context("Failed to initialize chain provider")?,
    );

    // Wallet
    let capability = Arc::new(
        LocalWalletCapability::from_env(&settings.wallet, settings.rpc.chain_id)
            .context("Failed to load wallet")?,
    );
    let account = Account::connect(capability, settings.marketplace.account_address()?)
        .await
        .context("Failed to connect wallet")?;

    // Submission pipeline
    let sequencer = Arc::new(NonceSequencer::new(client.clone()));
    match sequencer.sync(account.address()).await {
        Ok(nonce) => info!("Next nonce for {:?}: {}", account.address(), nonce),
        Err(e) => warn!("Initial nonce sync failed, will retry on first submission: {}", e),
    }

    let pipeline = Arc::new(TransactionPipeline::new(
        Arc::new(GasEstimator::new(client.clone(), &settings.gas)),
        sequencer,
        Arc::new(TransactionSigner::new(settings.rpc.chain_id)),
        Arc::new(ChainBroadcaster::new(client.clone(), &settings.rpc)),
    ));
    info!("Transaction pipeline initialized");

    // Listing cache
    let cache = Arc::new(ListingCache::new(
        Arc::new(ContractListingSource::new(client.clone(), contract)),
        Arc::new(SystemClock),
        settings.cache.ttl(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            pipeline,
            cache,
            account,
            contract,
            client,
            request_timeout: settings.relayer.request_timeout(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Marketplace Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Marketplace Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,marketplace_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
