//! Nonce management for reliable transaction submission
//!
//! One async mutex per account. A submission takes a [`NonceLease`] before it
//! estimates gas and keeps it until the broadcast is acknowledged, so two
//! submissions for the same account never prepare transactions at the same time.
//!
//! Inside the lease the nonce is read lazily from the network (pending block)
//! and raised to the local high-water mark, which covers endpoints that have not
//! yet seen the previous transaction. The mark only moves on acknowledged
//! broadcasts and is dropped after outcomes that leave the chain state unclear.

use super::Nonce;
use crate::chain::ChainClient;
use crate::error::NonceError;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Per-account nonce state
#[derive(Debug, Default)]
struct AccountNonceState {
    /// Next nonce after the last acknowledged broadcast, if still trusted
    next: Option<u64>,
}

/// Serializes submissions per account and hands out nonces
pub struct NonceSequencer {
    client: Arc<dyn ChainClient>,
    accounts: DashMap<Address, Arc<Mutex<AccountNonceState>>>,
}

impl NonceSequencer {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            accounts: DashMap::new(),
        }
    }

    /// Wait for exclusive use of `account`'s sequence. No network access.
    pub async fn lease(&self, account: Address) -> NonceLease {
        let slot = self
            .accounts
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonceState::default())))
            .clone();

        NonceLease {
            account,
            client: self.client.clone(),
            state: slot.lock_owned().await,
            reserved: None,
        }
    }

    /// Reconcile the local mark with the chain, e.g. on startup
    pub async fn sync(&self, account: Address) -> Result<Nonce, NonceError> {
        let mut lease = self.lease(account).await;
        let on_chain = lease.fetch().await?;

        if let Some(local) = lease.state.next {
            if on_chain > local {
                warn!(
                    "Nonce gap detected for {:?}: local {}, chain {}",
                    account, local, on_chain
                );
            }
        }

        let next = lease.state.next.map_or(on_chain, |local| local.max(on_chain));
        lease.state.next = Some(next);
        debug!("Synced nonce for {:?}: {}", account, next);
        Ok(next)
    }

    /// Drop the local mark so the next lease trusts the network count
    pub async fn invalidate(&self, account: Address) {
        self.lease(account).await.invalidate();
    }
}

/// Exclusive hold on one account's sequence for a single submission
///
/// Dropping the lease without [`confirm`](Self::confirm) leaves the sequence untouched.
pub struct NonceLease {
    account: Address,
    client: Arc<dyn ChainClient>,
    state: OwnedMutexGuard<AccountNonceState>,
    reserved: Option<Nonce>,
}

impl NonceLease {
    /// Nonce for the transaction being prepared under this lease
    pub async fn next(&mut self) -> Result<Nonce, NonceError> {
        if let Some(nonce) = self.reserved {
            return Ok(nonce);
        }

        let on_chain = self.fetch().await?;
        let nonce = match self.state.next {
            Some(local) if local > on_chain => {
                debug!(
                    "Endpoint behind for {:?}: chain {}, local {}",
                    self.account, on_chain, local
                );
                local
            }
            _ => on_chain,
        };

        self.reserved = Some(nonce);
        debug!("Allocated nonce {} for {:?}", nonce, self.account);
        Ok(nonce)
    }

    /// The broadcast using `nonce` was acknowledged
    pub fn confirm(mut self, nonce: Nonce) {
        let next = nonce + 1;
        if self.state.next.map_or(true, |local| next > local) {
            self.state.next = Some(next);
        }
    }

    /// Chain state is unclear; re-read it on the next lease
    pub fn invalidate(mut self) {
        self.state.next = None;
    }

    async fn fetch(&self) -> Result<Nonce, NonceError> {
        self.client
            .transaction_count(self.account)
            .await
            .map_err(|source| NonceError {
                account: self.account,
                source,
            })
    }
}
