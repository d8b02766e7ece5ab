//! Private-key capability for headless deployments

use super::AccountCapability;
use crate::config::WalletConfig;
use crate::error::SigningError;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};

/// Signs with a key taken from the environment
pub struct LocalWalletCapability {
    wallet: LocalWallet,
}

impl LocalWalletCapability {
    pub fn new(wallet: LocalWallet, chain_id: u64) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
        }
    }

    /// Load the key from the variable named by `wallet.private_key_env`
    pub fn from_env(config: &WalletConfig, chain_id: u64) -> Result<Self, SigningError> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            SigningError::Unavailable(format!(
                "No wallet configured. Set {}",
                config.private_key_env
            ))
        })?;

        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| SigningError::Unavailable(format!("Invalid private key: {}", e)))?;

        Ok(Self::new(wallet, chain_id))
    }
}

#[async_trait]
impl AccountCapability for LocalWalletCapability {
    async fn request_accounts(&self) -> Result<Vec<Address>, SigningError> {
        Ok(vec![self.wallet.address()])
    }

    async fn sign(
        &self,
        account: Address,
        tx: &TypedTransaction,
    ) -> Result<Signature, SigningError> {
        if account != self.wallet.address() {
            return Err(SigningError::Refused(format!(
                "no key for account {:?}",
                account
            )));
        }

        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SigningError::Refused(e.to_string()))
    }
}
