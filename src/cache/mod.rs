//! Time-bounded cache of the marketplace's current listings
//!
//! A fresh entry is served without touching the network. Once it is older than
//! the TTL the next `get` performs one read and swaps the entry in a single
//! assignment. There is no event-driven invalidation: a purchase made elsewhere
//! can stay invisible for up to one TTL.

use crate::chain::ChainClient;
use crate::contract::{decode_listings, ContractCall, Listing};
use crate::error::CacheReadError;
use crate::metrics;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where listings come from on a cache miss
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self) -> Result<Vec<Listing>, CacheReadError>;
}

/// Reads `getItemsForSale()` with a read-only `eth_call`
pub struct ContractListingSource {
    client: Arc<dyn ChainClient>,
    contract: Address,
}

impl ContractListingSource {
    pub fn new(client: Arc<dyn ChainClient>, contract: Address) -> Self {
        Self { client, contract }
    }
}

#[async_trait]
impl ListingSource for ContractListingSource {
    async fn fetch_listings(&self) -> Result<Vec<Listing>, CacheReadError> {
        let data = ContractCall::items_for_sale(self.contract)
            .encode()
            .map_err(|e| CacheReadError::Decode(e.to_string()))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(data)
            .into();

        let output = self
            .client
            .call(&tx)
            .await
            .map_err(CacheReadError::Network)?;

        decode_listings(&output)
    }
}

/// One successful read
#[derive(Debug)]
pub struct CacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub listings: Arc<Vec<Listing>>,
}

impl CacheEntry {
    /// Fresh while younger than `ttl`. An entry from the future is never fresh.
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => false,
        }
    }
}

pub struct ListingCache {
    source: Arc<dyn ListingSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: RwLock<Option<Arc<CacheEntry>>>,
    /// Serializes refreshes so concurrent stale readers share one read
    refresh: Mutex<()>,
}

impl ListingCache {
    pub fn new(source: Arc<dyn ListingSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl,
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Current listings, refreshed from the source if the entry is stale or absent
    pub async fn get(&self) -> Result<Arc<Vec<Listing>>, CacheReadError> {
        if let Some(entry) = self.fresh().await {
            metrics::record_cache_hit();
            return Ok(entry.listings.clone());
        }

        let _refreshing = self.refresh.lock().await;

        // Another reader may have refreshed while we waited
        if let Some(entry) = self.fresh().await {
            metrics::record_cache_hit();
            return Ok(entry.listings.clone());
        }

        metrics::record_cache_miss();
        let listings = match self.source.fetch_listings().await {
            Ok(listings) => listings,
            Err(e) => {
                metrics::record_cache_refresh_failure();
                return Err(e);
            }
        };

        let entry = Arc::new(CacheEntry {
            fetched_at: self.clock.now(),
            listings: Arc::new(listings),
        });
        metrics::record_listings(entry.listings.len());
        debug!(
            "Refreshed {} listings at {}",
            entry.listings.len(),
            entry.fetched_at
        );

        *self.entry.write().await = Some(entry.clone());
        Ok(entry.listings.clone())
    }

    /// Last successful read regardless of age
    pub async fn cached(&self) -> Option<Arc<CacheEntry>> {
        self.entry.read().await.clone()
    }

    async fn fresh(&self) -> Option<Arc<CacheEntry>> {
        let entry = self.entry.read().await.clone()?;
        let now = self.clock.now();
        if entry.is_fresh(now, self.ttl) {
            return Some(entry);
        }
        if now < entry.fetched_at {
            warn!(
                "Listing entry timestamp {} is ahead of clock {}",
                entry.fetched_at, now
            );
        }
        None
    }
}
