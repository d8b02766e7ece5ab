//! Turns a quoted, sequenced call into a signed legacy transaction

use super::{GasQuote, Nonce, SignTransaction, SignedTransaction};
use crate::contract::ContractCall;
use crate::error::SigningError;
use crate::wallet::Account;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::TransactionRequest;

/// Encodes calls and delegates the signature to the account's capability
pub struct TransactionSigner {
    chain_id: u64,
}

impl TransactionSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    fn build(
        &self,
        call: &ContractCall,
        quote: &GasQuote,
        nonce: Nonce,
        account: &Account,
    ) -> Result<TypedTransaction, SigningError> {
        let data = call
            .encode()
            .map_err(|e| SigningError::Encoding(e.to_string()))?;

        Ok(TransactionRequest::new()
            .from(account.address())
            .to(call.target())
            .value(call.value())
            .data(data)
            .gas(quote.gas_limit)
            .gas_price(quote.gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into())
    }
}

#[async_trait]
impl SignTransaction for TransactionSigner {
    async fn sign(
        &self,
        call: &ContractCall,
        quote: &GasQuote,
        nonce: Nonce,
        account: &Account,
    ) -> Result<SignedTransaction, SigningError> {
        let tx = self.build(call, quote, nonce, account)?;
        let signature = account.sign(&tx).await?;

        Ok(SignedTransaction {
            raw: tx.rlp_signed(&signature),
            hash: tx.hash(&signature),
            call: call.clone(),
            nonce,
            quote: quote.clone(),
        })
    }
}
