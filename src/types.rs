//! Shared types for the ARBSCAN scanner.
//!
//! These types form the data model used across all modules. Raw token
//! amounts are `U256` integers (the on-chain representation); prices,
//! spreads and price-impact fractions are `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;
use web3::types::{Address, U256};

// ---------------------------------------------------------------------------
// Tokens & pairs
// ---------------------------------------------------------------------------

/// An ERC-20 token as configured for the scanned pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// The scanned pair.
///
/// `token0` is the quote currency the round trip starts and ends in
/// (e.g. USDC); `token1` is the target token bought and sold (e.g. WETH).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token0: Token,
    pub token1: Token,
}

impl TokenPair {
    pub fn label(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Swap direction, relative to the pair's token0/token1 orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Spend token0, receive token1 (the buy leg).
    ZeroForOne,
    /// Spend token1, receive token0 (the sell leg).
    OneForZero,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::ZeroForOne => Direction::OneForZero,
            Direction::OneForZero => Direction::ZeroForOne,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ZeroForOne => write!(f, "0->1"),
            Direction::OneForZero => write!(f, "1->0"),
        }
    }
}

// ---------------------------------------------------------------------------
// Venue configuration
// ---------------------------------------------------------------------------

/// Swap fee in basis points (30 = 0.3%). Valid range is `0..10_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeeRate(u32);

/// Basis-point denominator.
pub const BPS: u32 = 10_000;

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub const fn from_bps(bps: u32) -> Self {
        FeeRate(bps)
    }

    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Whether the rate lies in `[0, 1)`.
    pub fn is_valid(&self) -> bool {
        self.0 < BPS
    }

    /// Fee as a fraction (0.003 for 30 bps).
    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Liquidity-model family of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityModel {
    /// Uniswap-V2 style x*y=k pools (QuickSwap, SushiSwap, ...).
    ConstantProduct,
    /// Uniswap-V3 style concentrated liquidity pools.
    Concentrated,
}

impl fmt::Display for LiquidityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiquidityModel::ConstantProduct => write!(f, "constant_product"),
            LiquidityModel::Concentrated => write!(f, "concentrated"),
        }
    }
}

// ---------------------------------------------------------------------------
// Price state
// ---------------------------------------------------------------------------

/// Tradable curve parameters of a venue, oriented to the scanned pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    ConstantProduct {
        #[serde(with = "u256_dec")]
        reserve0: U256,
        #[serde(with = "u256_dec")]
        reserve1: U256,
    },
    /// Pool-native V3 state. `sqrt_price_x96` is token1/token0 *of the pool*;
    /// `token0_is_pair_token0` says whether the pool's token0 is the pair's
    /// token0 (otherwise every direction is mirrored).
    Concentrated {
        #[serde(with = "u256_dec")]
        sqrt_price_x96: U256,
        liquidity: u128,
        tick: i32,
        tick_spacing: i32,
        token0_is_pair_token0: bool,
    },
}

/// Snapshot of a venue's curve for the pair.
///
/// Owned by the quote that produced it and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceState {
    pub curve: Curve,
    /// Block height the state was read at, when the source knows it.
    pub block_number: Option<u64>,
    /// Wall-clock time the state was observed.
    pub observed_at: DateTime<Utc>,
}

impl PriceState {
    /// Constant-product state observed now.
    pub fn constant_product(reserve0: U256, reserve1: U256) -> Self {
        Self {
            curve: Curve::ConstantProduct { reserve0, reserve1 },
            block_number: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn model(&self) -> LiquidityModel {
        match self.curve {
            Curve::ConstantProduct { .. } => LiquidityModel::ConstantProduct,
            Curve::Concentrated { .. } => LiquidityModel::Concentrated,
        }
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// The outcome of fetching one venue in one round.
#[derive(Debug, Clone)]
pub struct Quote {
    pub round_id: Uuid,
    pub venue: String,
    pub model: LiquidityModel,
    pub fee: FeeRate,
    pub outcome: Result<PriceState, VenueFetchFailure>,
    pub latency: Duration,
}

impl Quote {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn state(&self) -> Option<&PriceState> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&VenueFetchFailure> {
        self.outcome.as_ref().err()
    }
}

/// All quotes collected in one synchronization round, keyed by venue name.
///
/// Always holds exactly one entry per configured venue.
#[derive(Debug, Clone)]
pub struct QuoteSet {
    pub round_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub quotes: BTreeMap<String, Quote>,
}

impl QuoteSet {
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn get(&self, venue: &str) -> Option<&Quote> {
        self.quotes.get(venue)
    }

    /// Successful quotes, in venue-name order.
    pub fn successful(&self) -> impl Iterator<Item = (&Quote, &PriceState)> {
        self.quotes
            .values()
            .filter_map(|q| q.state().map(|s| (q, s)))
    }

    pub fn successful_count(&self) -> usize {
        self.quotes.values().filter(|q| q.is_ok()).count()
    }

    /// Failed quotes, in venue-name order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &VenueFetchFailure)> {
        self.quotes
            .iter()
            .filter_map(|(name, q)| q.failure().map(|f| (name.as_str(), f)))
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Realized execution of a hypothetical swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub amount_in: U256,
    pub amount_out: U256,
    /// Output per unit of input actually realized (raw units).
    pub effective_price: Decimal,
    /// Marginal output per unit of input before the trade (raw units).
    pub spot_price: Decimal,
    /// `1 - effective_price / spot_price`; includes the fee.
    pub price_impact: Decimal,
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// An accepted round-trip arbitrage: buy token1 on `buy_venue`, sell it on
/// `sell_venue`. All amounts are raw token0 units except `target_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Deterministic id: round + venue pair + size. Sinks dedupe on it.
    pub id: String,
    pub round_id: Uuid,
    pub pair: String,
    pub quote_decimals: u8,
    pub buy_venue: String,
    pub sell_venue: String,
    #[serde(with = "u256_dec")]
    pub trade_size: U256,
    /// token1 received on the buy leg (after haircut).
    #[serde(with = "u256_dec")]
    pub target_amount: U256,
    #[serde(with = "u256_dec")]
    pub proceeds: U256,
    #[serde(with = "u256_dec")]
    pub gross_profit: U256,
    #[serde(with = "u256_dec")]
    pub gas_cost: U256,
    #[serde(with = "u256_dec")]
    pub net_profit: U256,
    /// Sell-venue spot over buy-venue spot, minus one.
    pub spread: Decimal,
    /// Effective quote paid per whole target token on the buy leg.
    pub buy_price: Decimal,
    /// Effective quote received per whole target token on the sell leg.
    pub sell_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    pub fn make_id(round_id: Uuid, buy: &str, sell: &str, trade_size: U256) -> String {
        format!("{round_id}:{buy}->{sell}:{trade_size}")
    }

    /// Net profit in human quote-token units.
    pub fn net_profit_units(&self) -> Option<Decimal> {
        to_units(self.net_profit, self.quote_decimals)
    }

    pub fn trade_size_units(&self) -> Option<Decimal> {
        to_units(self.trade_size, self.quote_decimals)
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<Decimal>| v.map(|d| d.round_dp(6).to_string()).unwrap_or_else(|| "n/a".into());
        write!(
            f,
            "[{}] BUY {} -> SELL {} | size={} net={} spread={:.4}%",
            self.pair,
            self.buy_venue,
            self.sell_venue,
            show(self.trade_size_units()),
            show(self.net_profit_units()),
            self.spread * Decimal::ONE_HUNDRED,
        )
    }
}

// ---------------------------------------------------------------------------
// Round reporting
// ---------------------------------------------------------------------------

/// How a polling round ended. Lets operators tell a quiet market apart
/// from a round where nothing could be quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Opportunities,
    NoOpportunity,
    InsufficientVenues,
    AllVenuesFailed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Opportunities => write!(f, "opportunities"),
            RoundStatus::NoOpportunity => write!(f, "no-opportunity"),
            RoundStatus::InsufficientVenues => write!(f, "insufficient-venues"),
            RoundStatus::AllVenuesFailed => write!(f, "all-venues-failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueFailureEntry {
    pub venue: String,
    pub reason: String,
}

/// A venue's marginal price this round, quote per whole target token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePrice {
    pub venue: String,
    pub price: Decimal,
}

/// Summary of one synchronize → evaluate → publish round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round_number: u64,
    pub round_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub venues_total: usize,
    pub venues_ok: usize,
    pub failures: Vec<VenueFailureEntry>,
    /// Venues quoted this round, in venue-name order.
    #[serde(default)]
    pub venue_prices: Vec<VenuePrice>,
    pub pairs_skipped: usize,
    pub opportunities: usize,
    #[serde(with = "u256_dec_opt")]
    pub best_net_profit: Option<U256>,
    pub status: RoundStatus,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{}: {}/{} venues ok, {} opportunities ({}) in {}ms",
            self.round_number,
            self.venues_ok,
            self.venues_total,
            self.opportunities,
            self.status,
            self.elapsed_ms,
        )
    }
}

/// Aggregate counters across rounds (observability only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerStats {
    pub rounds: u64,
    pub rounds_with_opportunities: u64,
    pub rounds_all_failed: u64,
    pub opportunities: u64,
    pub venue_failures: u64,
    pub started_at: DateTime<Utc>,
    pub last_round_at: Option<DateTime<Utc>>,
}

impl Default for ScannerStats {
    fn default() -> Self {
        Self {
            rounds: 0,
            rounds_with_opportunities: 0,
            rounds_all_failed: 0,
            opportunities: 0,
            venue_failures: 0,
            started_at: Utc::now(),
            last_round_at: None,
        }
    }
}

impl ScannerStats {
    pub fn record(&mut self, report: &RoundReport) {
        self.rounds += 1;
        self.opportunities += report.opportunities as u64;
        self.venue_failures += report.failures.len() as u64;
        match report.status {
            RoundStatus::Opportunities => self.rounds_with_opportunities += 1,
            RoundStatus::AllVenuesFailed => self.rounds_all_failed += 1,
            _ => {}
        }
        self.last_round_at = Some(report.started_at);
    }

    /// Fraction of rounds that produced at least one opportunity.
    pub fn hit_rate(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.rounds_with_opportunities as f64 / self.rounds as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a venue produced no usable state this round. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueFetchFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("node lagging: {0}")]
    NodeLagging(String),

    #[error("stale state observed at {observed_at} ({age_ms}ms before round start)")]
    Stale {
        observed_at: DateTime<Utc>,
        age_ms: i64,
    },
}

/// Failure of a single simulation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

/// Largest mantissa a `Decimal` can hold (2^96 - 1).
pub(crate) const DECIMAL_MAX_MANTISSA: u128 = (1u128 << 96) - 1;

/// Convert a raw amount into human units (`1_000_000` with 6 decimals → `1`).
///
/// Drops trailing precision when the raw value exceeds `Decimal`'s range;
/// returns `None` only when even the integer part does not fit.
pub fn to_units(amount: U256, decimals: u8) -> Option<Decimal> {
    let mut value = amount;
    let mut scale = decimals as u32;
    while value > U256::from(DECIMAL_MAX_MANTISSA) && scale > 0 {
        value /= U256::from(10u8);
        scale -= 1;
    }
    if value > U256::from(DECIMAL_MAX_MANTISSA) || scale > 28 {
        return None;
    }
    Some(Decimal::from_i128_with_scale(value.as_u128() as i128, scale))
}

/// Convert human units into a raw amount, truncating digits beyond
/// `decimals`. Returns `None` for negative values or overflow.
pub fn from_units(value: Decimal, decimals: u8) -> Option<U256> {
    if value.is_sign_negative() {
        return None;
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let scale = value.scale();
    let decimals = decimals as u32;
    if decimals >= scale {
        mantissa.checked_mul(U256::exp10((decimals - scale) as usize))
    } else {
        Some(mantissa / U256::exp10((scale - decimals) as usize))
    }
}

/// Serde helpers: `U256` as a decimal string (JSON-safe, human-readable).
pub mod u256_dec {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use web3::types::U256;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(&raw).map_err(|e| D::Error::custom(format!("invalid U256 {raw:?}: {e:?}")))
    }
}

pub mod u256_dec_opt {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use web3::types::U256;

    pub fn serialize<S: Serializer>(value: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<U256>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|r| {
            U256::from_dec_str(&r).map_err(|e| D::Error::custom(format!("invalid U256 {r:?}: {e:?}")))
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
