//! ARBSCAN — cross-venue DEX arbitrage opportunity detector
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires venues and sinks, and runs the synchronize→evaluate→publish
//! loop until Ctrl+C.

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use arbscan::alerts::TelegramAlerter;
use arbscan::config::{AppConfig, VenueConfig};
use arbscan::dashboard::{self, DashboardSink, DashboardState};
use arbscan::engine::{GasEstimator, QuoteSynchronizer, Scanner, ScannerConfig, SyncConfig};
use arbscan::storage::{FanoutSink, JsonlSink, LogSink, OpportunitySink, QueuedSink, SqliteSink};
use arbscan::strategy::{EvaluatorConfig, OpportunityEvaluator};
use arbscan::types::{LiquidityModel, RoundStatus, TokenPair};
use arbscan::venues::{
    ChainReader, ConcentratedSource, ConstantProductSource, PoolLocator, Venue, VenueQuoteSource,
    Web3ChainReader,
};

const BANNER: &str = r#"
    _    ____  ____  ____   ____    _    _   _
   / \  |  _ \| __ )/ ___| / ___|  / \  | \ | |
  / _ \ | |_) |  _ \\___ \| |     / _ \ |  \| |
 / ___ \|  _ <| |_) |___) | |___ / ___ \| |\  |
/_/   \_\_| \_\____/|____/ \____/_/   \_\_| \_|

  Cross-venue DEX spread scanner
  v0.1.0 — detection only, never trades
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    println!("{BANNER}");

    let pair = cfg.pair()?;
    let trade_sizes = cfg.trade_sizes()?;
    info!(
        pair = %pair,
        venues = cfg.venues.len(),
        trade_sizes = ?cfg.scanner.trade_sizes,
        poll_interval_secs = cfg.scanner.poll_interval_secs,
        sync_budget_ms = cfg.scanner.sync_budget_ms,
        "ARBSCAN starting up"
    );

    // -- Chain access ----------------------------------------------------

    let rpc_url = AppConfig::resolve_env(&cfg.rpc.url_env)?;
    let reader: Arc<dyn ChainReader> = Arc::new(
        Web3ChainReader::new(&rpc_url, cfg.rpc.max_concurrent_requests)
            .context("Failed to create RPC transport")?,
    );

    let venues = cfg
        .venues
        .iter()
        .map(|vc| build_venue(vc, reader.clone()))
        .collect::<Result<Vec<_>>>()?;
    for venue in &venues {
        info!(venue = %venue.name, model = %venue.model, fee = %venue.fee, "Venue configured");
    }

    // -- Sinks -----------------------------------------------------------

    let dashboard_state = Arc::new(DashboardState::new(
        pair.label(),
        venues.iter().map(|v| v.name.clone()).collect(),
    ));
    let (sink, queued) = build_sinks(&cfg, &pair, dashboard_state.clone()).await?;

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(dashboard_state, cfg.dashboard.port).await?;
    }

    // -- Engine ----------------------------------------------------------

    let max_input = trade_sizes.last().copied().unwrap_or_default();
    let synchronizer = QuoteSynchronizer::new(SyncConfig {
        fetch_timeout: cfg.fetch_timeout(),
        staleness_tolerance: cfg.staleness_tolerance(),
        max_concurrent_fetches: cfg.scanner.max_concurrent_fetches,
        max_input,
    });
    let evaluator = OpportunityEvaluator::new(
        &pair,
        EvaluatorConfig {
            min_profit: cfg.min_profit()?,
            slippage_bps: cfg.scanner.slippage_bps,
            search_optimal_size: cfg.scanner.search_optimal_size,
        },
    );
    let gas = build_gas_estimator(&cfg, &pair, reader)?;

    let mut scanner = Scanner::new(
        pair,
        venues,
        synchronizer,
        evaluator,
        gas,
        sink,
        ScannerConfig {
            trade_sizes,
            sync_budget: cfg.sync_budget(),
        },
    );

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(cfg.poll_interval());
    // A slow round delays the next one instead of triggering a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.scanner.poll_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = scanner.run_round().await;
                if report.status == RoundStatus::AllVenuesFailed {
                    warn!(round = report.round_number, "No venue could be quoted this round");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let stats = scanner.stats().clone();
    drop(scanner);

    // Flush queued sinks now that nothing else holds them.
    for sink in queued {
        match Arc::try_unwrap(sink) {
            Ok(sink) => sink.close().await,
            Err(sink) => warn!(sink = sink.name(), "Queued sink still shared, not flushed"),
        }
    }

    info!(
        rounds = stats.rounds,
        opportunities = stats.opportunities,
        hit_rate = format!("{:.1}%", stats.hit_rate() * 100.0),
        venue_failures = stats.venue_failures,
        "ARBSCAN shut down cleanly."
    );

    Ok(())
}

fn build_venue(vc: &VenueConfig, reader: Arc<dyn ChainReader>) -> Result<Venue> {
    let locator = vc.locator()?;
    let source: Arc<dyn VenueQuoteSource> = match (vc.model, locator) {
        (LiquidityModel::ConstantProduct, locator) => {
            Arc::new(ConstantProductSource::new(&vc.name, reader, locator))
        }
        (LiquidityModel::Concentrated, PoolLocator::Pool(pool)) => {
            Arc::new(ConcentratedSource::new(&vc.name, reader, pool))
        }
        (LiquidityModel::Concentrated, PoolLocator::Router(_)) => {
            anyhow::bail!("venue {}: concentrated venues need a pool address", vc.name)
        }
    };
    Ok(Venue::new(&vc.name, vc.fee(), source))
}

/// Assemble the fan-out sink. Slow sinks sit behind a bounded queue; the
/// queued handles are returned separately so they can be flushed on exit.
async fn build_sinks(
    cfg: &AppConfig,
    pair: &TokenPair,
    dashboard_state: Arc<DashboardState>,
) -> Result<(Arc<dyn OpportunitySink>, Vec<Arc<QueuedSink>>)> {
    let sinks_cfg = &cfg.sinks;
    let max_wait = std::time::Duration::from_millis(sinks_cfg.max_publish_wait_ms);
    let mut fanout = FanoutSink::default();
    let mut queued = Vec::new();

    fanout.push(Arc::new(LogSink));
    fanout.push(Arc::new(DashboardSink::new(dashboard_state)));

    let mut slow: Vec<Arc<dyn OpportunitySink>> = Vec::new();
    if let Some(path) = &sinks_cfg.jsonl_path {
        let sink = JsonlSink::open(path)
            .await
            .with_context(|| format!("Failed to open JSONL sink {path}"))?;
        info!(path = %path, "JSONL sink enabled");
        slow.push(Arc::new(sink));
    }
    if let Some(url) = &sinks_cfg.sqlite_url {
        let sink = SqliteSink::connect(url)
            .await
            .with_context(|| format!("Failed to open SQLite sink {url}"))?;
        info!(url = %url, "SQLite sink enabled");
        slow.push(Arc::new(sink));
    }
    if let Some(alerter) = build_alerter(cfg, pair)? {
        slow.push(Arc::new(alerter));
    }

    for inner in slow {
        let sink = Arc::new(QueuedSink::spawn(
            inner,
            sinks_cfg.queue_capacity,
            max_wait,
            sinks_cfg.max_retries,
        ));
        fanout.push(sink.clone());
        queued.push(sink);
    }

    info!(count = fanout.len(), "Sinks ready");
    Ok((Arc::new(fanout), queued))
}

fn build_alerter(cfg: &AppConfig, pair: &TokenPair) -> Result<Option<TelegramAlerter>> {
    let (Some(token_env), Some(chat_env)) = (
        cfg.sinks.telegram_bot_token_env.as_deref(),
        cfg.sinks.telegram_chat_id_env.as_deref(),
    ) else {
        return Ok(None);
    };

    let (token, chat_id) = match (AppConfig::resolve_env(token_env), AppConfig::resolve_env(chat_env)) {
        (Ok(token), Ok(chat_id)) => (token, chat_id),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Telegram credentials missing, alerts disabled");
            return Ok(None);
        }
    };

    let alerter = TelegramAlerter::new(
        token,
        chat_id.expose_secret().clone(),
        cfg.alert_min_profit()?,
    )?;
    info!(pair = %pair, "Telegram alerts enabled");
    Ok(Some(alerter))
}

fn build_gas_estimator(
    cfg: &AppConfig,
    pair: &TokenPair,
    reader: Arc<dyn ChainReader>,
) -> Result<GasEstimator> {
    let fixed = cfg.fixed_gas_cost()?;
    let estimator = match (cfg.gas.gas_units, cfg.gas.native_price_in_quote) {
        (Some(gas_units), Some(native_price_in_quote)) => {
            info!(gas_units, native_price = %native_price_in_quote, "Live gas estimate enabled");
            GasEstimator::Live {
                reader,
                gas_units,
                native_price_in_quote,
                quote_decimals: pair.token0.decimals,
                fallback: fixed,
                timeout: std::time::Duration::from_millis(cfg.gas.timeout_ms),
            }
        }
        _ => GasEstimator::Fixed(fixed),
    };
    Ok(estimator)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbscan=info"));

    let json_logging = std::env::var("ARBSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

