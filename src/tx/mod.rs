//! Transaction submission: gas estimation, nonce sequencing, signing, broadcast
//!
//! [`TransactionPipeline`] runs the four steps in order for one [`ContractCall`].
//! Each step sits behind a trait so alternative implementations (and test doubles)
//! can be swapped in without touching the pipeline.

mod broadcast;
mod gas;
mod nonce;
mod pipeline;
mod signer;

pub use broadcast::ChainBroadcaster;
pub use gas::GasEstimator;
pub use nonce::{NonceLease, NonceSequencer};
pub use pipeline::{SubmissionProgress, TransactionPipeline};
pub use signer::TransactionSigner;

use crate::contract::ContractCall;
use crate::error::{BroadcastError, EstimationError, SigningError};
use crate::wallet::Account;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// Per-account transaction sequence number
pub type Nonce = u64;

/// Gas limit and price for one submission. Never reused across submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQuote {
    pub gas_limit: U256,
    pub gas_price: U256,
}

impl GasQuote {
    /// Upper bound on the fee paid, in wei
    pub fn max_cost(&self) -> U256 {
        self.gas_limit.saturating_mul(self.gas_price)
    }
}

/// A signed, ready-to-send payload. Single use.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: H256,
    pub call: ContractCall,
    pub nonce: Nonce,
    pub quote: GasQuote,
}

/// Outcome of an included transaction
#[derive(Debug, Clone)]
pub struct Receipt {
    pub tx_hash: H256,
    /// False when the transaction was mined but reverted
    pub success: bool,
    pub block_number: Option<u64>,
    pub call: ContractCall,
    pub nonce: Nonce,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EstimateGas: Send + Sync {
    async fn estimate(&self, call: &ContractCall, from: Address)
        -> Result<GasQuote, EstimationError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignTransaction: Send + Sync {
    async fn sign(
        &self,
        call: &ContractCall,
        quote: &GasQuote,
        nonce: Nonce,
        account: &Account,
    ) -> Result<SignedTransaction, SigningError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcast: Send + Sync {
    /// Submit and wait for inclusion
    async fn send(&self, tx: &SignedTransaction) -> Result<Receipt, BroadcastError>;
}
