//! Chain module - the JSON-RPC boundary of the relayer
//!
//! Everything the relayer needs from the ledger goes through [`ChainClient`]:
//! gas estimation, nonce lookup, read-only contract calls, raw transaction
//! submission and receipt polling. [`ChainProvider`] is the ethers-backed
//! implementation with multi-endpoint failover.

pub mod finality;
pub mod provider;

pub use finality::wait_for_receipt;
pub use provider::ChainProvider;

use crate::error::RpcError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID the client is configured for
    fn chain_id(&self) -> u64;

    /// `eth_estimateGas` for an unsigned call
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, RpcError>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> Result<U256, RpcError>;

    /// `eth_getTransactionCount` at the pending block
    async fn transaction_count(&self, account: Address) -> Result<u64, RpcError>;

    /// `eth_call` against the latest block
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcError>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError>;

    async fn transaction_receipt(&self, hash: H256)
        -> Result<Option<TransactionReceipt>, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;
}
