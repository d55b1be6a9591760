//! Full synchronize → evaluate → publish rounds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::assert_ok;

use arbscan::dashboard::{DashboardSink, DashboardState};
use arbscan::engine::{GasEstimator, QuoteSynchronizer, Scanner, ScannerConfig, SyncConfig};
use arbscan::storage::{FanoutSink, JsonlSink, OpportunitySink};
use arbscan::strategy::{EvaluatorConfig, OpportunityEvaluator};
use arbscan::types::{RoundStatus, VenueFetchFailure};
use arbscan::venues::Venue;

use crate::mock_venue::{pair, usdc, venue, MockVenue};

fn temp_path() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("arbscan_round_{}.jsonl", uuid::Uuid::new_v4()));
    p
}

fn scanner(venues: Vec<Venue>, sink: Arc<dyn OpportunitySink>, budget: Duration) -> Scanner {
    let pair = pair();
    let sizes = vec![usdc(100), usdc(1_000)];
    Scanner::new(
        pair.clone(),
        venues,
        QuoteSynchronizer::new(SyncConfig {
            fetch_timeout: budget,
            max_input: usdc(1_000),
            ..SyncConfig::default()
        }),
        OpportunityEvaluator::new(
            &pair,
            EvaluatorConfig {
                min_profit: usdc(1),
                ..EvaluatorConfig::default()
            },
        ),
        GasEstimator::Fixed(usdc(2)),
        sink,
        ScannerConfig {
            trade_sizes: sizes,
            sync_budget: budget,
        },
    )
}

#[tokio::test]
async fn test_round_reaches_jsonl_and_dashboard() {
    let path = temp_path();
    let jsonl = Arc::new(assert_ok!(JsonlSink::open(&path).await));
    let state = Arc::new(DashboardState::new("USDC/WETH", vec!["cheap".into(), "rich".into()]));
    let mut fanout = FanoutSink::default();
    fanout.push(jsonl);
    fanout.push(Arc::new(DashboardSink::new(state.clone())));

    // WETH at 2000 on one venue and 2100 on the other.
    let (cheap, _) = venue("cheap", MockVenue::new(2_000_000, 1_000));
    let (rich, _) = venue("rich", MockVenue::new(2_100_000, 1_000));
    let mut scanner = scanner(vec![cheap, rich], Arc::new(fanout), Duration::from_secs(1));

    let report = scanner.run_round().await;
    assert_eq!(report.status, RoundStatus::Opportunities);
    assert_eq!(report.venues_ok, 2);
    assert_eq!(report.opportunities, 1);

    let opportunities = state.opportunities.read().await;
    assert_eq!(opportunities.len(), 1);
    let best = &opportunities[0];
    assert_eq!(best.buy_venue, "cheap");
    assert_eq!(best.sell_venue, "rich");
    // The larger size wins: ~4.4% spread on 1000 USDC minus fees and gas.
    assert_eq!(best.trade_size, usdc(1_000));
    assert!(best.net_profit > usdc(30) && best.net_profit < usdc(50));
    assert_eq!(best.gas_cost, usdc(2));
    assert_eq!(state.rounds.read().await.len(), 1);

    let contents = assert_ok!(tokio::fs::read_to_string(&path).await);
    assert!(contents.contains(&best.id));
    assert!(contents.contains("\"kind\":\"round\""));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_silent_venue_does_not_hold_the_round() {
    let (a, _) = venue("a", MockVenue::new(2_000_000, 1_000));
    let (b, _) = venue("b", MockVenue::new(2_100_000, 1_000));
    let (silent, silent_mock) = venue(
        "silent",
        MockVenue::new(1_900_000, 1_000).with_delay(Duration::from_secs(30)),
    );
    let state = Arc::new(DashboardState::new("USDC/WETH", Vec::new()));
    let mut scanner = scanner(
        vec![a, b, silent],
        Arc::new(DashboardSink::new(state.clone())),
        Duration::from_millis(500),
    );

    let started = Instant::now();
    let report = scanner.run_round().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(silent_mock.calls(), 1);

    assert_eq!(report.venues_total, 3);
    assert_eq!(report.venues_ok, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].venue, "silent");
    assert!(report.failures[0].reason.contains("timed out"));

    // The two answering venues still form an opportunity.
    assert_eq!(report.status, RoundStatus::Opportunities);
    let opportunities = state.opportunities.read().await;
    assert!(opportunities
        .iter()
        .all(|o| o.buy_venue != "silent" && o.sell_venue != "silent"));
}

#[tokio::test]
async fn test_all_venues_failing_is_reported() {
    let (a, _) = venue("a", MockVenue::failing(VenueFetchFailure::Network("connection refused".into())));
    let (b, _) = venue(
        "b",
        MockVenue::failing(VenueFetchFailure::MalformedResponse("short return data".into())),
    );
    let state = Arc::new(DashboardState::new("USDC/WETH", Vec::new()));
    let mut scanner = scanner(
        vec![a, b],
        Arc::new(DashboardSink::new(state.clone())),
        Duration::from_secs(1),
    );

    let report = scanner.run_round().await;
    assert_eq!(report.status, RoundStatus::AllVenuesFailed);
    assert_eq!(report.failures.len(), 2);
    assert!(report.best_net_profit.is_none());
    assert!(state.opportunities.read().await.is_empty());
    assert_eq!(state.stats.read().await.rounds_all_failed, 1);
}

#[tokio::test]
async fn test_stale_state_is_excluded() {
    let (a, _) = venue("a", MockVenue::new(2_000_000, 1_000));
    let (b, _) = venue(
        "b",
        MockVenue::new(2_100_000, 1_000).with_age(chrono::Duration::seconds(60)),
    );
    let state = Arc::new(DashboardState::new("USDC/WETH", Vec::new()));
    let mut scanner = scanner(
        vec![a, b],
        Arc::new(DashboardSink::new(state.clone())),
        Duration::from_secs(1),
    );

    let report = scanner.run_round().await;
    assert_eq!(report.status, RoundStatus::InsufficientVenues);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.starts_with("stale"));
    assert!(state.opportunities.read().await.is_empty());
}

#[tokio::test]
async fn test_consecutive_rounds_get_distinct_ids() {
    let (a, _) = venue("a", MockVenue::new(2_000_000, 1_000));
    let (b, _) = venue("b", MockVenue::new(2_100_000, 1_000));
    let state = Arc::new(DashboardState::new("USDC/WETH", Vec::new()));
    let mut scanner = scanner(
        vec![a, b],
        Arc::new(DashboardSink::new(state.clone())),
        Duration::from_secs(1),
    );

    let first = scanner.run_round().await;
    let second = scanner.run_round().await;
    assert_ne!(first.round_id, second.round_id);
    assert_eq!(second.round_number, 2);
    assert_eq!(scanner.stats().rounds, 2);

    let opportunities = state.opportunities.read().await;
    assert_eq!(opportunities.len(), 2);
    assert_ne!(opportunities[0].id, opportunities[1].id);
    assert_eq!(opportunities[0].net_profit, opportunities[1].net_profit);
}
