//! Submission pipeline: estimate, sequence, sign, broadcast

use super::{Broadcast, EstimateGas, NonceSequencer, Receipt, SignTransaction};
use crate::contract::ContractCall;
use crate::error::{BroadcastErrorKind, PipelineError};
use crate::wallet::Account;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// How far a submission got, readable after its future is dropped
#[derive(Debug, Default)]
pub struct SubmissionProgress {
    broadcasting: AtomicBool,
}

impl SubmissionProgress {
    /// The signed payload was handed to the broadcaster
    pub fn broadcast_started(&self) -> bool {
        self.broadcasting.load(Ordering::SeqCst)
    }

    fn mark_broadcasting(&self) {
        self.broadcasting.store(true, Ordering::SeqCst);
    }
}

/// Runs the four submission steps in order for one call
///
/// Holds no state of its own; the only state shared between submissions is the
/// sequencer's per-account lease. There is no retry here, callers decide based on
/// [`PipelineError::is_retryable`] and [`PipelineError::outcome`].
pub struct TransactionPipeline {
    estimator: Arc<dyn EstimateGas>,
    sequencer: Arc<NonceSequencer>,
    signer: Arc<dyn SignTransaction>,
    broadcaster: Arc<dyn Broadcast>,
}

impl TransactionPipeline {
    pub fn new(
        estimator: Arc<dyn EstimateGas>,
        sequencer: Arc<NonceSequencer>,
        signer: Arc<dyn SignTransaction>,
        broadcaster: Arc<dyn Broadcast>,
    ) -> Self {
        Self {
            estimator,
            sequencer,
            signer,
            broadcaster,
        }
    }

    pub fn sequencer(&self) -> &Arc<NonceSequencer> {
        &self.sequencer
    }

    /// Submit `call` from `account` and wait for inclusion.
    ///
    /// Dropping the returned future before the broadcast step sends nothing.
    pub async fn submit(
        &self,
        call: ContractCall,
        account: &Account,
    ) -> Result<Receipt, PipelineError> {
        self.submit_tracked(call, account, &SubmissionProgress::default())
            .await
    }

    /// Like [`submit`](Self::submit), recording into `progress` when the
    /// broadcast step begins
    pub async fn submit_tracked(
        &self,
        call: ContractCall,
        account: &Account,
        progress: &SubmissionProgress,
    ) -> Result<Receipt, PipelineError> {
        let from = account.address();

        // Held until the broadcast settles so no other submission for this
        // account can read the same starting nonce
        let mut lease = self.sequencer.lease(from).await;

        let quote = self
            .estimator
            .estimate(&call, from)
            .await
            .map_err(PipelineError::Estimate)?;

        let nonce = lease.next().await.map_err(PipelineError::Sequence)?;

        let signed = self
            .signer
            .sign(&call, &quote, nonce, account)
            .await
            .map_err(PipelineError::Sign)?;

        debug!(
            "Broadcasting {} from {:?} with nonce {}",
            call.method().name(),
            from,
            nonce
        );

        progress.mark_broadcasting();
        match self.broadcaster.send(&signed).await {
            Ok(receipt) => {
                lease.confirm(nonce);
                Ok(receipt)
            }
            Err(e) => {
                match e.kind {
                    BroadcastErrorKind::Rejected if e.is_nonce_conflict() => lease.invalidate(),
                    BroadcastErrorKind::Unknown => lease.invalidate(),
                    // Nothing was accepted, the local mark is still right
                    BroadcastErrorKind::Rejected | BroadcastErrorKind::Unreachable => drop(lease),
                }
                Err(PipelineError::Broadcast(e))
            }
        }
    }
}
