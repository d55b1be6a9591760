//! Uniswap-V3 style concentrated-liquidity venues.
//!
//! Orientation and tick spacing never change for a pool, so they are read
//! once. Each fetch reads `slot0()`, `liquidity()` and the block number.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{info, trace};
use web3::types::{Address, U256};

use super::abi;
use super::constant_product::orientation;
use super::rpc::ChainReader;
use super::{BlockWatermark, VenueQuoteSource};
use crate::strategy::v3_math::{MAX_TICK, MIN_SQRT_RATIO, MIN_TICK};
use crate::types::{Curve, LiquidityModel, PriceState, TokenPair, VenueFetchFailure};

#[derive(Debug, Clone, Copy)]
struct PoolShape {
    token0_is_pair_token0: bool,
    tick_spacing: i32,
}

pub struct ConcentratedSource {
    name: String,
    reader: Arc<dyn ChainReader>,
    pool: Address,
    shape: OnceCell<PoolShape>,
    watermark: BlockWatermark,
}

impl ConcentratedSource {
    pub fn new(name: impl Into<String>, reader: Arc<dyn ChainReader>, pool: Address) -> Self {
        Self {
            name: name.into(),
            reader,
            pool,
            shape: OnceCell::new(),
            watermark: BlockWatermark::default(),
        }
    }

    async fn shape(&self, pair: &TokenPair) -> Result<PoolShape, VenueFetchFailure> {
        self.shape
            .get_or_try_init(|| async {
                let (token0, spacing) = tokio::try_join!(
                    self.reader.call(self.pool, abi::encode_call(abi::TOKEN0)),
                    self.reader.call(self.pool, abi::encode_call(abi::TICK_SPACING)),
                )?;
                let token0_is_pair_token0 = orientation(abi::decode_address(&token0, 0)?, pair)?;
                let tick_spacing = abi::decode_i32(&spacing, 0)?;
                if tick_spacing <= 0 {
                    return Err(VenueFetchFailure::MalformedResponse(format!(
                        "tick spacing {tick_spacing} must be positive"
                    )));
                }
                info!(
                    venue = %self.name,
                    pool = ?self.pool,
                    tick_spacing,
                    token0_is_pair_token0,
                    "Resolved concentrated-liquidity pool"
                );
                Ok(PoolShape { token0_is_pair_token0, tick_spacing })
            })
            .await
            .copied()
    }
}

#[async_trait]
impl VenueQuoteSource for ConcentratedSource {
    async fn fetch(&self, pair: &TokenPair, max_input: U256) -> Result<PriceState, VenueFetchFailure> {
        let shape = self.shape(pair).await?;

        let (slot0, liquidity, block) = tokio::try_join!(
            self.reader.call(self.pool, abi::encode_call(abi::SLOT0)),
            self.reader.call(self.pool, abi::encode_call(abi::LIQUIDITY)),
            self.reader.block_number(),
        )?;
        self.watermark.observe(block)?;

        let sqrt_price_x96 = abi::decode_uint(&slot0, 0)?;
        let tick = abi::decode_i32(&slot0, 1)?;
        let liquidity = abi::decode_u128(&liquidity, 0)?;

        if sqrt_price_x96 < U256::from(MIN_SQRT_RATIO) || !(MIN_TICK..=MAX_TICK).contains(&tick) {
            return Err(VenueFetchFailure::MalformedResponse(format!(
                "slot0 out of range: sqrt_price={sqrt_price_x96} tick={tick}"
            )));
        }
        trace!(venue = %self.name, tick, liquidity, max_input = %max_input, "slot0");

        Ok(PriceState {
            curve: Curve::Concentrated {
                sqrt_price_x96,
                liquidity,
                tick,
                tick_spacing: shape.tick_spacing,
                token0_is_pair_token0: shape.token0_is_pair_token0,
            },
            block_number: Some(block),
            observed_at: Utc::now(),
        })
    }

    fn model(&self) -> LiquidityModel {
        LiquidityModel::Concentrated
    }
}
