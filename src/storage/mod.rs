//! Opportunity sinks.
//!
//! Accepted opportunities and round reports flow out of the scanner through
//! the `OpportunitySink` trait. Implementations here cover structured
//! logging, append-only JSONL, SQLite and in-process fan-out; the bounded
//! queue in `queue` decouples slow sinks from the polling loop.

pub mod jsonl;
pub mod queue;
pub mod sqlite;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::{Opportunity, RoundReport};

pub use jsonl::JsonlSink;
pub use queue::QueuedSink;
pub use sqlite::SqliteSink;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("queue full after waiting {0:?}")]
    QueueFull(std::time::Duration),

    #[error("sink closed")]
    Closed,
}

/// Receiver of accepted opportunities.
///
/// Publishing the same opportunity id twice must not create a duplicate
/// record; the scanner may retry after a transient failure.
#[async_trait]
pub trait OpportunitySink: Send + Sync {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError>;

    /// Called once per round, after all of the round's opportunities.
    async fn record_round(&self, _report: &RoundReport) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

/// Emits opportunities as structured `tracing` events.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl OpportunitySink for LogSink {
    async fn publish(&self, opp: &Opportunity) -> Result<(), SinkError> {
        info!(
            id = %opp.id,
            pair = %opp.pair,
            buy = %opp.buy_venue,
            sell = %opp.sell_venue,
            trade_size = %opp.trade_size,
            net_profit = %opp.net_profit,
            gas_cost = %opp.gas_cost,
            spread_pct = %(opp.spread * rust_decimal::Decimal::ONE_HUNDRED).round_dp(4),
            "Opportunity: {opp}"
        );
        Ok(())
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        info!(
            round = report.round_number,
            round_id = %report.round_id,
            status = %report.status,
            venues_ok = report.venues_ok,
            venues_total = report.venues_total,
            opportunities = report.opportunities,
            elapsed_ms = report.elapsed_ms,
            "{report}"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Broadcasts to several sinks. A failing member is logged and skipped;
/// the first error is returned after every member has been tried.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OpportunitySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn OpportunitySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn OpportunitySink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl OpportunitySink for FanoutSink {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(opportunity).await {
                warn!(sink = sink.name(), id = %opportunity.id, error = %e, "Sink publish failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record_round(report).await {
                warn!(sink = sink.name(), round = report.round_number, error = %e, "Sink round record failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

// ---------------------------------------------------------------------------
// Dedupe window
// ---------------------------------------------------------------------------

/// Ids remembered per deduplicating sink.
pub const DEDUPE_WINDOW: usize = 4096;

/// Set of the most recently inserted ids; the oldest is evicted once
/// `capacity` is reached.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(DEDUPE_WINDOW)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
