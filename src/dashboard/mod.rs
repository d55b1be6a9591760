//! Dashboard: Axum web server for real-time monitoring.
//!
//! Serves a read-only REST API and a self-contained HTML page. Fed by
//! `DashboardSink`, which the scanner publishes to like any other sink.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::storage::{OpportunitySink, SinkError};
use crate::types::{Opportunity, RoundReport};
pub use routes::{AppState, DashboardState};

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/status", get(routes::get_status))
        .route("/api/rounds", get(routes::get_rounds))
        .route("/api/opportunities", get(routes::get_opportunities))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Feeds the dashboard's in-memory history.
pub struct DashboardSink {
    state: AppState,
}

impl DashboardSink {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl OpportunitySink for DashboardSink {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError> {
        self.state.push_opportunity(opportunity.clone()).await;
        Ok(())
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        self.state.push_round(report.clone()).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "dashboard"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
