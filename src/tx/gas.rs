//! Gas estimation for marketplace calls

use super::{EstimateGas, GasQuote};
use crate::chain::ChainClient;
use crate::config::GasConfig;
use crate::contract::ContractCall;
use crate::error::EstimationError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Quotes gas for a call against live network conditions
pub struct GasEstimator {
    client: Arc<dyn ChainClient>,
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    /// Ceiling for the buffered gas price
    max_gas_price: Option<U256>,
}

impl GasEstimator {
    pub fn new(client: Arc<dyn ChainClient>, config: &GasConfig) -> Self {
        Self {
            client,
            gas_limit_buffer_percent: config.limit_buffer_percent,
            gas_price_buffer_percent: config.price_buffer_percent,
            max_gas_price: config.max_gas_price(),
        }
    }
}

fn with_buffer(value: U256, percent: u64) -> U256 {
    value.saturating_add(value.saturating_mul(U256::from(percent)) / 100)
}

#[async_trait]
impl EstimateGas for GasEstimator {
    async fn estimate(
        &self,
        call: &ContractCall,
        from: Address,
    ) -> Result<GasQuote, EstimationError> {
        let data = call
            .encode()
            .map_err(|e| EstimationError::Encoding(e.to_string()))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(call.target())
            .value(call.value())
            .data(data)
            .into();

        // Both queries go out together; either failing fails the quote
        let (units, price) = tokio::try_join!(
            async {
                self.client
                    .estimate_gas(&tx)
                    .await
                    .map_err(EstimationError::GasUnits)
            },
            async {
                self.client
                    .gas_price()
                    .await
                    .map_err(EstimationError::GasPrice)
            },
        )?;

        let gas_limit = with_buffer(units, self.gas_limit_buffer_percent);
        let mut gas_price = with_buffer(price, self.gas_price_buffer_percent);

        if let Some(cap) = self.max_gas_price {
            if gas_price > cap {
                warn!("Gas price {} above cap {}, capping", gas_price, cap);
                gas_price = cap;
            }
        }

        let quote = GasQuote {
            gas_limit,
            gas_price,
        };
        debug!(
            "Quoted {} for {:?}: gas {} at {} wei (max fee {})",
            call.method().name(),
            from,
            quote.gas_limit,
            quote.gas_price,
            quote.max_cost()
        );

        Ok(quote)
    }
}
