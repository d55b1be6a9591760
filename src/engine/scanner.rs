//! The polling round: synchronize → evaluate → publish.
//!
//! One `Scanner` owns the venue list and the per-round collaborators. Each
//! call to `run_round` produces exactly one `RoundReport`; rounds never
//! overlap because the caller awaits each one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use web3::types::U256;

use super::gas::GasEstimator;
use super::synchronizer::QuoteSynchronizer;
use crate::storage::OpportunitySink;
use crate::strategy::{simulator, Evaluation, EvaluationStatus, OpportunityEvaluator};
use crate::types::{
    QuoteSet, RoundReport, RoundStatus, ScannerStats, TokenPair, VenueFailureEntry, VenuePrice,
};
use crate::venues::Venue;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Trade sizes (raw quote units) evaluated every round.
    pub trade_sizes: Vec<U256>,
    /// Time budget for collecting quotes.
    pub sync_budget: Duration,
}

pub struct Scanner {
    pair: TokenPair,
    venues: Vec<Venue>,
    synchronizer: QuoteSynchronizer,
    evaluator: OpportunityEvaluator,
    gas: GasEstimator,
    sink: Arc<dyn OpportunitySink>,
    config: ScannerConfig,
    stats: ScannerStats,
    round_number: u64,
}

impl Scanner {
    pub fn new(
        pair: TokenPair,
        venues: Vec<Venue>,
        synchronizer: QuoteSynchronizer,
        evaluator: OpportunityEvaluator,
        gas: GasEstimator,
        sink: Arc<dyn OpportunitySink>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            pair,
            venues,
            synchronizer,
            evaluator,
            gas,
            sink,
            config,
            stats: ScannerStats::default(),
            round_number: 0,
        }
    }

    pub fn stats(&self) -> &ScannerStats {
        &self.stats
    }

    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    /// Run one round and publish its results.
    pub async fn run_round(&mut self) -> RoundReport {
        self.round_number += 1;

        let (quotes, gas_cost) = tokio::join!(
            self.synchronizer
                .collect(&self.pair, &self.venues, self.config.sync_budget),
            self.gas.estimate(),
        );
        debug!(
            round = self.round_number,
            ok = quotes.successful_count(),
            total = quotes.len(),
            gas_cost = %gas_cost,
            "Quotes collected"
        );

        let evaluation = self
            .evaluator
            .evaluate_sizes(&quotes, &self.config.trade_sizes, gas_cost);

        for opportunity in &evaluation.opportunities {
            if let Err(e) = self.sink.publish(opportunity).await {
                warn!(id = %opportunity.id, sink = self.sink.name(), error = %e, "Failed to publish opportunity");
            }
        }

        let report = build_report(self.round_number, &self.pair, &quotes, &evaluation);
        info!(
            round = report.round_number,
            ok = report.venues_ok,
            total = report.venues_total,
            prices = %format_prices(&report.venue_prices),
            elapsed_ms = report.elapsed_ms,
            "Round complete"
        );
        if let Err(e) = self.sink.record_round(&report).await {
            warn!(round = report.round_number, sink = self.sink.name(), error = %e, "Failed to record round");
        }
        self.stats.record(&report);

        if report.status == RoundStatus::Opportunities {
            info!(
                round = report.round_number,
                count = report.opportunities,
                best_net_profit = ?report.best_net_profit.map(|p| p.to_string()),
                "Opportunities found"
            );
        }
        report
    }
}

pub fn round_status(quotes: &QuoteSet, evaluation: &Evaluation) -> RoundStatus {
    if quotes.successful_count() == 0 {
        RoundStatus::AllVenuesFailed
    } else if evaluation.status == EvaluationStatus::InsufficientVenues {
        RoundStatus::InsufficientVenues
    } else if evaluation.opportunities.is_empty() {
        RoundStatus::NoOpportunity
    } else {
        RoundStatus::Opportunities
    }
}

/// Each quoted venue's marginal price, quote per whole target token.
pub fn venue_prices(pair: &TokenPair, quotes: &QuoteSet) -> Vec<VenuePrice> {
    quotes
        .successful()
        .filter_map(|(quote, state)| {
            match simulator::quote_per_target(state, pair.token0.decimals, pair.token1.decimals) {
                Ok(price) => Some(VenuePrice { venue: quote.venue.clone(), price }),
                Err(e) => {
                    debug!(venue = %quote.venue, error = %e, "No spot price");
                    None
                }
            }
        })
        .collect()
}

fn format_prices(prices: &[VenuePrice]) -> String {
    if prices.is_empty() {
        return "none".into();
    }
    prices
        .iter()
        .map(|p| format!("{}={}", p.venue, p.price.round_dp(6).normalize()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_report(
    round_number: u64,
    pair: &TokenPair,
    quotes: &QuoteSet,
    evaluation: &Evaluation,
) -> RoundReport {
    RoundReport {
        round_number,
        round_id: quotes.round_id,
        started_at: quotes.started_at,
        elapsed_ms: quotes.elapsed.as_millis() as u64,
        venues_total: quotes.len(),
        venues_ok: quotes.successful_count(),
        failures: quotes
            .failures()
            .map(|(venue, failure)| VenueFailureEntry {
                venue: venue.to_string(),
                reason: failure.to_string(),
            })
            .collect(),
        venue_prices: venue_prices(pair, quotes),
        pairs_skipped: evaluation.skipped.len(),
        opportunities: evaluation.opportunities.len(),
        best_net_profit: evaluation.best().map(|o| o.net_profit),
        status: round_status(quotes, evaluation),
    }
}
