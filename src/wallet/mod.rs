//! Wallet capability
//!
//! Key custody lives outside the relayer. The pipeline only sees an
//! [`AccountCapability`]: something that can list the accounts it controls and
//! sign a prepared transaction for one of them, or refuse to.

mod local;

pub use local::LocalWalletCapability;

use crate::error::SigningError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountCapability: Send + Sync {
    /// Accounts the key holder is willing to sign for
    async fn request_accounts(&self) -> Result<Vec<Address>, SigningError>;

    /// Sign `tx` on behalf of `account`
    async fn sign(&self, account: Address, tx: &TypedTransaction)
        -> Result<Signature, SigningError>;
}

/// An approved account together with the capability that signs for it
#[derive(Clone)]
pub struct Account {
    address: Address,
    capability: Arc<dyn AccountCapability>,
}

impl Account {
    pub fn new(address: Address, capability: Arc<dyn AccountCapability>) -> Self {
        Self {
            address,
            capability,
        }
    }

    /// Ask the capability for its accounts and pick `preferred`, or the first one
    pub async fn connect(
        capability: Arc<dyn AccountCapability>,
        preferred: Option<Address>,
    ) -> Result<Self, SigningError> {
        let accounts = capability.request_accounts().await?;

        let address = match preferred {
            Some(wanted) if accounts.contains(&wanted) => wanted,
            Some(wanted) => {
                return Err(SigningError::Unavailable(format!(
                    "wallet does not control account {:?}",
                    wanted
                )))
            }
            None => *accounts
                .first()
                .ok_or_else(|| SigningError::Unavailable("No accounts found".to_string()))?,
        };

        info!("Connected as {:?}", address);
        Ok(Self::new(address, capability))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn sign(&self, tx: &TypedTransaction) -> Result<Signature, SigningError> {
        self.capability.sign(self.address, tx).await
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_picks_first_account() {
        let mut capability = MockAccountCapability::new();
        capability.expect_request_accounts().returning(|| {
            Ok(vec![Address::repeat_byte(1), Address::repeat_byte(2)])
        });

        let account = Account::connect(Arc::new(capability), None).await.unwrap();
        assert_eq!(account.address(), Address::repeat_byte(1));
    }

    #[tokio::test]
    async fn test_connect_honours_preferred_account() {
        let mut capability = MockAccountCapability::new();
        capability.expect_request_accounts().returning(|| {
            Ok(vec![Address::repeat_byte(1), Address::repeat_byte(2)])
        });

        let account = Account::connect(Arc::new(capability), Some(Address::repeat_byte(2)))
            .await
            .unwrap();
        assert_eq!(account.address(), Address::repeat_byte(2));
    }

    #[tokio::test]
    async fn test_connect_without_accounts_fails() {
        let mut capability = MockAccountCapability::new();
        capability.expect_request_accounts().returning(|| Ok(vec![]));

        let err = Account::connect(Arc::new(capability), None).await.unwrap_err();
        assert!(matches!(err, SigningError::Unavailable(_)));
    }
}
