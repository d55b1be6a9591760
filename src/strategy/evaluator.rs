//! Cross-venue opportunity evaluation.
//!
//! For every ordered pair of venues with a usable quote, simulates buying
//! the target token on one and selling it on the other, then keeps the
//! round trips whose net profit clears the configured floor.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;
use web3::types::U256;

use super::simulator::{self, unit_price};
use super::v2_math;
use crate::types::{
    Curve, Direction, Opportunity, PriceState, Quote, QuoteSet, SimulationError,
    SimulationResult, TokenPair, BPS,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Net profit (raw quote units) an opportunity must strictly exceed.
    pub min_profit: U256,
    /// Haircut applied to the output of each leg, in basis points.
    pub slippage_bps: u32,
    /// Add the closed-form optimal input to the size ladder when both venues
    /// are constant-product pools.
    pub search_optimal_size: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_profit: U256::zero(),
            slippage_bps: 0,
            search_optimal_size: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStatus {
    /// Fewer than two venues produced a quote; nothing was compared.
    InsufficientVenues,
    Evaluated,
}

/// A venue pair/size combination whose simulation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPair {
    pub buy_venue: String,
    pub sell_venue: String,
    pub trade_size: U256,
    pub reason: SimulationError,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub round_id: Uuid,
    pub status: EvaluationStatus,
    /// Accepted opportunities, best first.
    pub opportunities: Vec<Opportunity>,
    pub skipped: Vec<SkippedPair>,
    pub pairs_evaluated: usize,
}

impl Evaluation {
    pub fn best(&self) -> Option<&Opportunity> {
        self.opportunities.first()
    }
}

/// Total order over opportunities: net profit desc, trade size desc,
/// buy venue asc, sell venue asc.
pub fn rank(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.net_profit
        .cmp(&a.net_profit)
        .then_with(|| b.trade_size.cmp(&a.trade_size))
        .then_with(|| a.buy_venue.cmp(&b.buy_venue))
        .then_with(|| a.sell_venue.cmp(&b.sell_venue))
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct OpportunityEvaluator {
    pair_label: String,
    quote_decimals: u8,
    target_decimals: u8,
    config: EvaluatorConfig,
}

impl OpportunityEvaluator {
    pub fn new(pair: &TokenPair, config: EvaluatorConfig) -> Self {
        Self {
            pair_label: pair.label(),
            quote_decimals: pair.token0.decimals,
            target_decimals: pair.token1.decimals,
            config,
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate every ordered venue pair at a single trade size.
    pub fn evaluate(&self, quotes: &QuoteSet, trade_size: U256, gas_cost: U256) -> Evaluation {
        self.evaluate_sizes(quotes, &[trade_size], gas_cost)
    }

    /// Evaluate every ordered venue pair over a ladder of trade sizes,
    /// keeping the best size per pair.
    pub fn evaluate_sizes(&self, quotes: &QuoteSet, sizes: &[U256], gas_cost: U256) -> Evaluation {
        let venues: Vec<(&Quote, &PriceState)> = quotes.successful().collect();
        let mut evaluation = Evaluation {
            round_id: quotes.round_id,
            status: EvaluationStatus::Evaluated,
            opportunities: Vec::new(),
            skipped: Vec::new(),
            pairs_evaluated: 0,
        };

        if venues.len() < 2 {
            evaluation.status = EvaluationStatus::InsufficientVenues;
            return evaluation;
        }

        for &buy in &venues {
            for &sell in &venues {
                if buy.0.venue == sell.0.venue {
                    continue;
                }
                evaluation.pairs_evaluated += 1;

                let mut best: Option<Opportunity> = None;
                for size in self.size_ladder(buy, sell, sizes) {
                    match self.simulate_pair(quotes, buy, sell, size, gas_cost) {
                        Ok(Some(opp)) => {
                            let better = best
                                .as_ref()
                                .map_or(true, |current| rank(&opp, current) == Ordering::Less);
                            if better {
                                best = Some(opp);
                            }
                        }
                        Ok(None) => {}
                        Err(reason) => {
                            debug!(
                                buy = %buy.0.venue,
                                sell = %sell.0.venue,
                                size = %size,
                                reason = %reason,
                                "Skipping venue pair"
                            );
                            evaluation.skipped.push(SkippedPair {
                                buy_venue: buy.0.venue.clone(),
                                sell_venue: sell.0.venue.clone(),
                                trade_size: size,
                                reason,
                            });
                        }
                    }
                }
                evaluation.opportunities.extend(best);
            }
        }

        evaluation.opportunities.sort_by(rank);
        evaluation
    }

    /// Configured sizes plus, when enabled, the analytic optimum for two
    /// constant-product venues (capped at the largest configured size).
    fn size_ladder(
        &self,
        buy: (&Quote, &PriceState),
        sell: (&Quote, &PriceState),
        sizes: &[U256],
    ) -> Vec<U256> {
        let mut ladder: Vec<U256> = sizes.iter().copied().filter(|s| !s.is_zero()).collect();
        if !self.config.search_optimal_size {
            return ladder;
        }
        let Some(cap) = ladder.iter().max().copied() else {
            return ladder;
        };

        if let (
            Curve::ConstantProduct { reserve0: b0, reserve1: b1 },
            Curve::ConstantProduct { reserve0: s0, reserve1: s1 },
        ) = (&buy.1.curve, &sell.1.curve)
        {
            if let Some(optimal) =
                v2_math::optimal_round_trip_input(*b0, *b1, buy.0.fee, *s1, *s0, sell.0.fee)
            {
                let optimal = optimal.min(cap);
                if !ladder.contains(&optimal) {
                    ladder.push(optimal);
                }
            }
        }
        ladder
    }

    fn haircut(&self, amount: U256) -> U256 {
        let keep = BPS.saturating_sub(self.config.slippage_bps);
        // keep ≤ 10_000, so this only overflows for amounts near U256::MAX.
        amount
            .checked_mul(U256::from(keep))
            .map(|v| v / U256::from(BPS))
            .unwrap_or_else(|| amount / U256::from(BPS) * U256::from(keep))
    }

    fn simulate_pair(
        &self,
        quotes: &QuoteSet,
        buy: (&Quote, &PriceState),
        sell: (&Quote, &PriceState),
        trade_size: U256,
        gas_cost: U256,
    ) -> Result<Option<Opportunity>, SimulationError> {
        let buy_leg = simulator::simulate(buy.1, trade_size, buy.0.fee, Direction::ZeroForOne)?;
        let target_amount = self.haircut(buy_leg.amount_out);
        let sell_leg =
            simulator::simulate(sell.1, target_amount, sell.0.fee, Direction::OneForZero)?;
        let proceeds = self.haircut(sell_leg.amount_out);

        if proceeds <= trade_size {
            return Ok(None);
        }
        let gross_profit = proceeds - trade_size;
        if gross_profit <= gas_cost {
            return Ok(None);
        }
        let net_profit = gross_profit - gas_cost;
        if net_profit <= self.config.min_profit {
            return Ok(None);
        }

        Ok(Some(Opportunity {
            id: Opportunity::make_id(quotes.round_id, &buy.0.venue, &sell.0.venue, trade_size),
            round_id: quotes.round_id,
            pair: self.pair_label.clone(),
            quote_decimals: self.quote_decimals,
            buy_venue: buy.0.venue.clone(),
            sell_venue: sell.0.venue.clone(),
            trade_size,
            target_amount,
            proceeds,
            gross_profit,
            gas_cost,
            net_profit,
            spread: spread(&buy_leg, &sell_leg),
            buy_price: unit_price(trade_size, self.quote_decimals, target_amount, self.target_decimals)?,
            sell_price: unit_price(proceeds, self.quote_decimals, target_amount, self.target_decimals)?,
            timestamp: round_timestamp(quotes),
        }))
    }
}

/// Relative gap between the two venues' spot rates: buying then selling an
/// infinitesimal amount returns `1 + spread` per unit, fees excluded.
fn spread(buy_leg: &SimulationResult, sell_leg: &SimulationResult) -> Decimal {
    buy_leg
        .spot_price
        .checked_mul(sell_leg.spot_price)
        .map(|round_trip| round_trip - Decimal::ONE)
        .unwrap_or_default()
}

fn round_timestamp(quotes: &QuoteSet) -> DateTime<Utc> {
    quotes.started_at
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
