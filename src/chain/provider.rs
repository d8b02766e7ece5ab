//! Chain provider with multi-RPC support and automatic failover

use super::ChainClient;
use crate::config::RpcConfig;
use crate::error::{ConfigurationError, MarketError, MarketResult, RpcError};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError as _};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider and check it serves the configured chain
    pub async fn new(config: &RpcConfig) -> MarketResult<Self> {
        let mut http_providers = Vec::new();

        for url in config.endpoints() {
            match Provider::<Http>::try_from(url) {
                Ok(provider) => {
                    let provider = provider.interval(config.poll_interval());
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(MarketError::Config(ConfigurationError(
                "No valid RPC providers".to_string(),
            )));
        }

        let provider = Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
        };

        match provider.remote_chain_id().await {
            Ok(remote) if remote != config.chain_id => {
                return Err(MarketError::Config(ConfigurationError(format!(
                    "RPC endpoint serves chain {} but rpc.chain_id is {}",
                    remote, config.chain_id
                ))));
            }
            Ok(_) => info!("Connected to chain {}", config.chain_id),
            Err(e) => warn!(
                "Could not verify chain id for chain {}, continuing: {}",
                config.chain_id, e
            ),
        }

        Ok(provider)
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    async fn remote_chain_id(&self) -> Result<u64, RpcError> {
        self.with_failover("eth_chainId", |p| async move { p.get_chainid().await })
            .await
            .map(|id| id.as_u64())
    }

    /// Run a read against the active provider, moving to the next one on
    /// transport failures. Errors reported by a node are returned as-is.
    async fn with_failover<T, F, Fut>(&self, method: &str, op: F) -> Result<T, RpcError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await.map_err(rpc_error) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() => {
                    warn!("{} failed on chain {}: {}", method, self.chain_id, e);
                    self.failover();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::Transport("All providers failed".to_string())))
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, RpcError> {
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, RpcError> {
        let count = self
            .with_failover("eth_getTransactionCount", |p| async move {
                p.get_transaction_count(account, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;

        Ok(count.low_u64())
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcError> {
        self.with_failover("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        // No failover here: a signed payload is only resent by the caller
        match self.http().send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => {
                let err = rpc_error(e);
                if err.is_transport() {
                    self.failover();
                }
                Err(err)
            }
        }
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.with_failover("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|b| b.as_u64())
    }
}

/// Split provider failures into node answers and transport failures
fn rpc_error(err: ProviderError) -> RpcError {
    if let Some(response) = err.as_error_response() {
        return RpcError::Rpc {
            code: response.code,
            message: response.message.clone(),
        };
    }
    if err.as_serde_error().is_some() {
        return RpcError::Decode(err.to_string());
    }
    RpcError::Transport(err.to_string())
}
