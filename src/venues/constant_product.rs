//! Uniswap-V2 style constant-product venues.
//!
//! The pool is either configured directly or discovered once through the
//! venue's router (`router.factory()` then `factory.getPair(...)`). Pool
//! orientation is resolved once; each fetch then reads `getReserves()` and
//! the block number concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use web3::types::{Address, U256};

use super::abi;
use super::rpc::ChainReader;
use super::{BlockWatermark, VenueQuoteSource};
use crate::types::{Curve, LiquidityModel, PriceState, TokenPair, VenueFetchFailure};

/// Where to find the pool for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLocator {
    Pool(Address),
    Router(Address),
}

#[derive(Debug, Clone, Copy)]
struct ResolvedPool {
    address: Address,
    token0_is_pair_token0: bool,
}

pub struct ConstantProductSource {
    name: String,
    reader: Arc<dyn ChainReader>,
    locator: PoolLocator,
    resolved: OnceCell<ResolvedPool>,
    watermark: BlockWatermark,
}

impl ConstantProductSource {
    pub fn new(name: impl Into<String>, reader: Arc<dyn ChainReader>, locator: PoolLocator) -> Self {
        Self {
            name: name.into(),
            reader,
            locator,
            resolved: OnceCell::new(),
            watermark: BlockWatermark::default(),
        }
    }

    async fn resolve(&self, pair: &TokenPair) -> Result<ResolvedPool, VenueFetchFailure> {
        self.resolved
            .get_or_try_init(|| async {
                let address = match self.locator {
                    PoolLocator::Pool(address) => address,
                    PoolLocator::Router(router) => self.discover_pool(router, pair).await?,
                };
                let token0 = self.read_address(address, abi::encode_call(abi::TOKEN0)).await?;
                let token0_is_pair_token0 = orientation(token0, pair)?;
                info!(
                    venue = %self.name,
                    pool = ?address,
                    token0_is_pair_token0,
                    "Resolved constant-product pool"
                );
                Ok(ResolvedPool { address, token0_is_pair_token0 })
            })
            .await
            .copied()
    }

    async fn discover_pool(&self, router: Address, pair: &TokenPair) -> Result<Address, VenueFetchFailure> {
        let factory = self.read_address(router, abi::encode_call(abi::FACTORY)).await?;
        let calldata =
            abi::encode_address_pair(abi::GET_PAIR, pair.token0.address, pair.token1.address);
        let pool = self.read_address(factory, calldata).await?;
        if pool.is_zero() {
            return Err(VenueFetchFailure::MalformedResponse(format!(
                "no {} pool deployed on factory {factory:?}",
                pair.label()
            )));
        }
        debug!(venue = %self.name, factory = ?factory, pool = ?pool, "Discovered pool via router");
        Ok(pool)
    }

    async fn read_address(&self, to: Address, data: Vec<u8>) -> Result<Address, VenueFetchFailure> {
        let raw = self.reader.call(to, data).await?;
        abi::decode_address(&raw, 0)
    }
}

/// Whether the pool's token0 is the pair's token0.
pub(super) fn orientation(pool_token0: Address, pair: &TokenPair) -> Result<bool, VenueFetchFailure> {
    if pool_token0 == pair.token0.address {
        Ok(true)
    } else if pool_token0 == pair.token1.address {
        Ok(false)
    } else {
        Err(VenueFetchFailure::MalformedResponse(format!(
            "pool token0 {pool_token0:?} is not part of {}",
            pair.label()
        )))
    }
}

#[async_trait]
impl VenueQuoteSource for ConstantProductSource {
    async fn fetch(&self, pair: &TokenPair, _max_input: U256) -> Result<PriceState, VenueFetchFailure> {
        let pool = self.resolve(pair).await?;

        let (raw, block) = tokio::try_join!(
            self.reader.call(pool.address, abi::encode_call(abi::GET_RESERVES)),
            self.reader.block_number(),
        )?;
        self.watermark.observe(block)?;

        let pool_reserve0 = abi::decode_uint(&raw, 0)?;
        let pool_reserve1 = abi::decode_uint(&raw, 1)?;
        let (reserve0, reserve1) = if pool.token0_is_pair_token0 {
            (pool_reserve0, pool_reserve1)
        } else {
            (pool_reserve1, pool_reserve0)
        };

        Ok(PriceState {
            curve: Curve::ConstantProduct { reserve0, reserve1 },
            block_number: Some(block),
            observed_at: Utc::now(),
        })
    }

    fn model(&self) -> LiquidityModel {
        LiquidityModel::ConstantProduct
    }
}
