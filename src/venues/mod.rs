//! Venue integrations.
//!
//! Defines the `VenueQuoteSource` trait and provides implementations for:
//! - Uniswap-V2 style constant-product pools (QuickSwap, SushiSwap, ...)
//! - Uniswap-V3 style concentrated-liquidity pools
//!
//! Both read chain state through a shared `ChainReader`.

pub mod abi;
pub mod concentrated;
pub mod constant_product;
pub mod rpc;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;
use web3::types::U256;

use crate::types::{FeeRate, LiquidityModel, PriceState, Quote, TokenPair, VenueFetchFailure};

pub use concentrated::ConcentratedSource;
pub use constant_product::{ConstantProductSource, PoolLocator};
pub use rpc::{ChainReader, Web3ChainReader};

/// Abstraction over on-chain liquidity venues.
///
/// Implementors return the venue's current curve for the pair, oriented so
/// that token0 of the state is the pair's token0. Failures are values, never
/// panics.
#[async_trait]
pub trait VenueQuoteSource: Send + Sync {
    /// Read the current state. `max_input` is the largest trade size the
    /// caller intends to simulate.
    async fn fetch(&self, pair: &TokenPair, max_input: U256)
        -> Result<PriceState, VenueFetchFailure>;

    fn model(&self) -> LiquidityModel;
}

/// A configured venue: identity, fee and the source that reads its state.
#[derive(Clone)]
pub struct Venue {
    pub name: String,
    pub model: LiquidityModel,
    pub fee: FeeRate,
    source: Arc<dyn VenueQuoteSource>,
}

impl std::fmt::Debug for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Venue")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("fee", &self.fee)
            .finish()
    }
}

impl Venue {
    pub fn new(name: impl Into<String>, fee: FeeRate, source: Arc<dyn VenueQuoteSource>) -> Self {
        Self {
            name: name.into(),
            model: source.model(),
            fee,
            source,
        }
    }

    /// Fetch a quote, giving up after `timeout`.
    pub async fn quote(
        &self,
        round_id: Uuid,
        pair: &TokenPair,
        max_input: U256,
        timeout: Duration,
    ) -> Quote {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.source.fetch(pair, max_input)).await {
            Ok(result) => result,
            Err(_) => Err(VenueFetchFailure::Timeout(timeout)),
        };
        Quote {
            round_id,
            venue: self.name.clone(),
            model: self.model,
            fee: self.fee,
            outcome,
            latency: started.elapsed(),
        }
    }
}

/// Highest block a source has seen; a read from an older block means the
/// node behind the load balancer is lagging.
#[derive(Debug, Default)]
pub(crate) struct BlockWatermark(AtomicU64);

impl BlockWatermark {
    pub(crate) fn observe(&self, block: u64) -> Result<(), VenueFetchFailure> {
        let previous = self.0.fetch_max(block, Ordering::Relaxed);
        if block < previous {
            return Err(VenueFetchFailure::NodeLagging(format!(
                "block {block} is behind previously seen block {previous}"
            )));
        }
        Ok(())
    }
}
