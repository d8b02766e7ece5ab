//! Broadcasts signed payloads and classifies what went wrong

use super::{Broadcast, Receipt, SignedTransaction};
use crate::chain::{wait_for_receipt, ChainClient};
use crate::config::RpcConfig;
use crate::error::BroadcastError;

use async_trait::async_trait;
use ethers::types::U64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Sends raw transactions through a [`ChainClient`] and waits for inclusion
pub struct ChainBroadcaster {
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
    confirmations: u64,
}

impl ChainBroadcaster {
    pub fn new(client: Arc<dyn ChainClient>, config: &RpcConfig) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval(),
            confirmations: config.confirmations,
        }
    }
}

#[async_trait]
impl Broadcast for ChainBroadcaster {
    async fn send(&self, tx: &SignedTransaction) -> Result<Receipt, BroadcastError> {
        let hash = self
            .client
            .send_raw_transaction(tx.raw.clone())
            .await
            .map_err(BroadcastError::from_submission)?;

        if hash != tx.hash {
            warn!(
                "Node reported hash {:?} for transaction {:?}",
                hash, tx.hash
            );
        }
        info!(
            "Transaction sent: {:?} ({} nonce {})",
            hash,
            tx.call.method().name(),
            tx.nonce
        );

        // From here on the payload may be pending, so every failure is ambiguous
        let receipt = wait_for_receipt(
            self.client.as_ref(),
            hash,
            self.confirmations,
            self.poll_interval,
        )
        .await
        .map_err(|e| {
            BroadcastError::unknown(format!(
                "transaction {:?} submitted but receipt lookup failed: {}",
                hash, e
            ))
        })?;

        Ok(Receipt {
            tx_hash: receipt.transaction_hash,
            success: receipt.status == Some(U64::from(1)),
            block_number: receipt.block_number.map(|b| b.as_u64()),
            call: tx.call.clone(),
            nonce: tx.nonce,
        })
    }
}
