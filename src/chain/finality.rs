//! Waiting for a submitted transaction to be included and buried
//!
//! A receipt only counts once the inclusion block has the configured number of
//! confirmations (the inclusion block itself is the first). Before reporting, the
//! receipt is fetched again so a transaction dropped by a reorg is waited on
//! instead of reported as included.

use super::ChainClient;
use crate::error::RpcError;

use ethers::types::{TransactionReceipt, H256};
use std::time::Duration;
use tracing::{debug, warn};

/// True once `current_block` buries `tx_block` under `required` confirmations
pub fn confirmations_reached(tx_block: u64, current_block: u64, required: u64) -> bool {
    current_block.saturating_sub(tx_block) + 1 >= required.max(1)
}

/// Poll until `hash` is included with `required` confirmations.
///
/// Does not time out on its own; callers bound it.
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    hash: H256,
    required: u64,
    poll_interval: Duration,
) -> Result<TransactionReceipt, RpcError> {
    loop {
        let receipt = match client.transaction_receipt(hash).await? {
            Some(receipt) => receipt,
            None => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let Some(tx_block) = receipt.block_number.map(|b| b.as_u64()) else {
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        if required <= 1 {
            return Ok(receipt);
        }

        let current_block = client.block_number().await?;
        if confirmations_reached(tx_block, current_block, required) {
            // Verify the transaction is still included (reorg protection)
            match client.transaction_receipt(hash).await? {
                Some(latest) if latest.block_number.is_some() => return Ok(latest),
                _ => {
                    warn!("Transaction {:?} left the chain at block {}, waiting", hash, tx_block);
                }
            }
        } else {
            debug!(
                "Transaction {:?} has {} / {} confirmations",
                hash,
                current_block.saturating_sub(tx_block) + 1,
                required
            );
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use ethers::types::U64;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn receipt(hash: H256, block: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(block)),
            status: Some(U64::from(1)),
            ..Default::default()
        }
    }

    #[test]
    fn test_confirmations_count_inclusion_block() {
        assert!(confirmations_reached(100, 100, 1));
        assert!(!confirmations_reached(100, 100, 2));
        assert!(confirmations_reached(100, 101, 2));
        assert!(confirmations_reached(100, 100, 0));
    }

    #[tokio::test]
    async fn test_waits_until_receipt_appears() {
        let hash = H256::repeat_byte(0xab);
        let polls = Arc::new(AtomicUsize::new(0));

        let mut client = MockChainClient::new();
        let counter = polls.clone();
        client.expect_transaction_receipt().returning(move |h| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(receipt(h, 12)))
            }
        });
        client.expect_block_number().never();

        let found = wait_for_receipt(&client, hash, 1, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(found.transaction_hash, hash);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_waits_for_required_depth() {
        let hash = H256::repeat_byte(0x01);
        let heads = Arc::new(AtomicUsize::new(10));

        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|h| Ok(Some(receipt(h, 10))));
        let head = heads.clone();
        client
            .expect_block_number()
            .returning(move || Ok(head.fetch_add(1, Ordering::SeqCst) as u64));

        wait_for_receipt(&client, hash, 3, Duration::from_millis(1))
            .await
            .unwrap();

        // heads 10 and 11 are too shallow, 12 gives three confirmations
        assert_eq!(heads.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn test_receipt_errors_are_returned() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|_| Err(RpcError::Transport("connection reset".into())));

        let err = wait_for_receipt(&client, H256::zero(), 1, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
