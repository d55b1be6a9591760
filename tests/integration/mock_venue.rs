//! Mock venue for integration testing.
//!
//! Provides a deterministic `VenueQuoteSource` serving fixed
//! constant-product reserves, with knobs for latency, failures and
//! stale observations, all in-memory with no RPC node.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use web3::types::{Address, U256};

use arbscan::types::{
    FeeRate, LiquidityModel, PriceState, Token, TokenPair, VenueFetchFailure,
};
use arbscan::venues::{Venue, VenueQuoteSource};

/// A mock venue for deterministic testing.
pub struct MockVenue {
    usdc: u64,
    weth: u64,
    delay: Duration,
    error: Option<VenueFetchFailure>,
    /// How long before "now" the returned state claims to be observed.
    age: chrono::Duration,
    calls: AtomicUsize,
}

impl MockVenue {
    /// Pool holding `usdc` whole USDC against `weth` whole WETH.
    pub fn new(usdc: u64, weth: u64) -> Self {
        Self {
            usdc,
            weth,
            delay: Duration::ZERO,
            error: None,
            age: chrono::Duration::zero(),
            calls: AtomicUsize::new(0),
        }
    }

    /// A venue that fails every fetch.
    pub fn failing(error: VenueFetchFailure) -> Self {
        Self {
            error: Some(error),
            ..Self::new(1, 1)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_age(mut self, age: chrono::Duration) -> Self {
        self.age = age;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueQuoteSource for MockVenue {
    async fn fetch(&self, _pair: &TokenPair, _max_input: U256) -> Result<PriceState, VenueFetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok(
            PriceState::constant_product(usdc(self.usdc), weth(self.weth))
                .with_observed_at(Utc::now() - self.age),
        )
    }

    fn model(&self) -> LiquidityModel {
        LiquidityModel::ConstantProduct
    }
}

pub fn usdc(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(6)
}

pub fn weth(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

pub fn pair() -> TokenPair {
    TokenPair {
        token0: Token {
            symbol: "USDC".into(),
            address: Address::from_low_u64_be(0xa0),
            decimals: 6,
        },
        token1: Token {
            symbol: "WETH".into(),
            address: Address::from_low_u64_be(0xa1),
            decimals: 18,
        },
    }
}

/// Wrap a mock in a 0.3% fee venue, keeping a handle for assertions.
pub fn venue(name: &str, mock: MockVenue) -> (Venue, Arc<MockVenue>) {
    let mock = Arc::new(mock);
    let venue = Venue::new(name, FeeRate::from_bps(30), mock.clone());
    (venue, mock)
}
