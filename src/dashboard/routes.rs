//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Opportunity, RoundReport, RoundStatus, ScannerStats};

/// Entries kept per ring buffer.
pub const HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub pair: String,
    pub venues: Vec<String>,
    pub stats: RwLock<ScannerStats>,
    pub rounds: RwLock<VecDeque<RoundReport>>,
    pub opportunities: RwLock<VecDeque<Opportunity>>,
}

impl DashboardState {
    pub fn new(pair: impl Into<String>, venues: Vec<String>) -> Self {
        Self {
            pair: pair.into(),
            venues,
            stats: RwLock::new(ScannerStats::default()),
            rounds: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            opportunities: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub async fn push_round(&self, report: RoundReport) {
        self.stats.write().await.record(&report);
        push_bounded(&mut *self.rounds.write().await, report);
    }

    /// Record an opportunity. A retried publish of an id already in the
    /// ring is ignored.
    pub async fn push_opportunity(&self, opportunity: Opportunity) {
        let mut ring = self.opportunities.write().await;
        if ring.iter().any(|o| o.id == opportunity.id) {
            return;
        }
        push_bounded(&mut ring, opportunity);
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T) {
    if ring.len() == HISTORY_LIMIT {
        ring.pop_front();
    }
    ring.push_back(item);
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub pair: String,
    pub venues: Vec<String>,
    pub rounds: u64,
    pub rounds_with_opportunities: u64,
    pub rounds_all_failed: u64,
    pub opportunities: u64,
    pub venue_failures: u64,
    pub hit_rate: f64,
    pub last_status: Option<RoundStatus>,
    pub last_round_at: Option<String>,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.stats.read().await;
    let last_status = state.rounds.read().await.back().map(|r| r.status);
    let uptime = (chrono::Utc::now() - stats.started_at).num_seconds();

    Json(StatusResponse {
        pair: state.pair.clone(),
        venues: state.venues.clone(),
        rounds: stats.rounds,
        rounds_with_opportunities: stats.rounds_with_opportunities,
        rounds_all_failed: stats.rounds_all_failed,
        opportunities: stats.opportunities,
        venue_failures: stats.venue_failures,
        hit_rate: stats.hit_rate(),
        last_status,
        last_round_at: stats.last_round_at.map(|t| t.to_rfc3339()),
        uptime_secs: uptime,
    })
}

/// GET /api/rounds (newest last)
pub async fn get_rounds(State(state): State<AppState>) -> Json<Vec<RoundReport>> {
    let rounds = state.rounds.read().await;
    Json(rounds.iter().cloned().collect())
}

/// GET /api/opportunities (newest last)
pub async fn get_opportunities(State(state): State<AppState>) -> Json<Vec<Opportunity>> {
    let opportunities = state.opportunities.read().await;
    Json(opportunities.iter().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
