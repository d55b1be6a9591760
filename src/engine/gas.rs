//! Gas cost estimation in quote-token units.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};
use web3::types::U256;

use crate::types::{from_units, to_units};
use crate::venues::ChainReader;

/// Decimals of the chain's native token (wei).
const NATIVE_DECIMALS: u8 = 18;

pub enum GasEstimator {
    /// Constant cost in raw quote units.
    Fixed(U256),
    /// `gas_price × gas_units`, converted to quote units at a configured
    /// native-token price. Falls back to `fallback` when the node cannot
    /// be read in time.
    Live {
        reader: Arc<dyn ChainReader>,
        gas_units: u64,
        native_price_in_quote: Decimal,
        quote_decimals: u8,
        fallback: U256,
        timeout: Duration,
    },
}

impl GasEstimator {
    pub async fn estimate(&self) -> U256 {
        match self {
            GasEstimator::Fixed(cost) => *cost,
            GasEstimator::Live {
                reader,
                gas_units,
                native_price_in_quote,
                quote_decimals,
                fallback,
                timeout,
            } => {
                let gas_price = match tokio::time::timeout(*timeout, reader.gas_price()).await {
                    Ok(Ok(price)) => price,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Gas price read failed, using fixed gas cost");
                        return *fallback;
                    }
                    Err(_) => {
                        warn!(timeout_ms = timeout.as_millis() as u64, "Gas price read timed out, using fixed gas cost");
                        return *fallback;
                    }
                };
                match native_cost_in_quote(gas_price, *gas_units, *native_price_in_quote, *quote_decimals) {
                    Some(cost) => {
                        debug!(gas_price = %gas_price, cost = %cost, "Live gas estimate");
                        cost
                    }
                    None => {
                        warn!(gas_price = %gas_price, "Gas cost out of range, using fixed gas cost");
                        *fallback
                    }
                }
            }
        }
    }
}

/// Wei spent on `gas_units` at `gas_price`, valued in raw quote units.
pub fn native_cost_in_quote(
    gas_price: U256,
    gas_units: u64,
    native_price_in_quote: Decimal,
    quote_decimals: u8,
) -> Option<U256> {
    let wei = gas_price.checked_mul(U256::from(gas_units))?;
    let native = to_units(wei, NATIVE_DECIMALS)?;
    from_units(native.checked_mul(native_price_in_quote)?, quote_decimals)
}
