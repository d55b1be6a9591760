//! Quote synchronizer.
//!
//! Fans out one fetch per venue into a round-owned `JoinSet` and joins them
//! against a single deadline. Whatever has not answered by then is aborted
//! and reported as a timeout, so the returned `QuoteSet` always holds
//! exactly one entry per configured venue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;
use web3::types::U256;

use crate::types::{Quote, QuoteSet, TokenPair, VenueFetchFailure};
use crate::venues::Venue;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-venue fetch timeout (never longer than the round budget).
    pub fetch_timeout: Duration,
    /// How far before round start a state may have been observed.
    pub staleness_tolerance: Duration,
    pub max_concurrent_fetches: usize,
    /// Sizing hint passed to every source.
    pub max_input: U256,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(2),
            staleness_tolerance: Duration::from_secs(5),
            max_concurrent_fetches: 8,
            max_input: U256::zero(),
        }
    }
}

pub struct QuoteSynchronizer {
    config: SyncConfig,
    permits: Arc<Semaphore>,
}

impl QuoteSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Collect one quote per venue within `budget`.
    pub async fn collect(&self, pair: &TokenPair, venues: &[Venue], budget: Duration) -> QuoteSet {
        let round_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + budget;
        let fetch_timeout = self.config.fetch_timeout.min(budget);
        let pair = Arc::new(pair.clone());

        let mut tasks = JoinSet::new();
        for venue in venues {
            let venue = venue.clone();
            let pair = Arc::clone(&pair);
            let permits = Arc::clone(&self.permits);
            let max_input = self.config.max_input;
            tasks.spawn(async move {
                // Held until the fetch finishes or the task is aborted.
                let _permit = permits.acquire_owned().await;
                venue.quote(round_id, &pair, max_input, fetch_timeout).await
            });
        }

        let mut quotes: BTreeMap<String, Quote> = BTreeMap::new();
        let mut budget_elapsed = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(quote))) => {
                    if quote.round_id != round_id {
                        warn!(venue = %quote.venue, "Discarding quote from another round");
                        continue;
                    }
                    let quote = self.check_freshness(quote, started_at);
                    quotes.insert(quote.venue.clone(), quote);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Venue fetch task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    budget_elapsed = true;
                    debug!(outstanding = tasks.len(), "Round budget elapsed, aborting fetches");
                    tasks.abort_all();
                    break;
                }
            }
        }
        drop(tasks);

        for venue in venues {
            quotes.entry(venue.name.clone()).or_insert_with(|| {
                let failure = if budget_elapsed {
                    VenueFetchFailure::Timeout(budget)
                } else {
                    VenueFetchFailure::Network("fetch task ended without a result".into())
                };
                Quote {
                    round_id,
                    venue: venue.name.clone(),
                    model: venue.model,
                    fee: venue.fee,
                    outcome: Err(failure),
                    latency: started.elapsed(),
                }
            });
        }

        for (venue, failure) in quotes
            .values()
            .filter_map(|q| q.failure().map(|f| (&q.venue, f)))
        {
            warn!(venue = %venue, reason = %failure, "Venue quote failed");
        }

        QuoteSet {
            round_id,
            started_at,
            elapsed: started.elapsed(),
            quotes,
        }
    }

    /// Turn a state observed too long before the round started into a
    /// `Stale` failure.
    fn check_freshness(&self, mut quote: Quote, round_start: DateTime<Utc>) -> Quote {
        let Ok(tolerance) = chrono::Duration::from_std(self.config.staleness_tolerance) else {
            return quote;
        };
        let Some(oldest_allowed) = round_start.checked_sub_signed(tolerance) else {
            return quote;
        };
        if let Ok(state) = &quote.outcome {
            if state.observed_at < oldest_allowed {
                let age_ms = (round_start - state.observed_at).num_milliseconds();
                quote.outcome = Err(VenueFetchFailure::Stale {
                    observed_at: state.observed_at,
                    age_ms,
                });
            }
        }
        quote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeeRate, LiquidityModel, PriceState, Token};
    use crate::venues::VenueQuoteSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use web3::types::Address;

    struct TestSource {
        delay: Duration,
        outcome: Result<(), VenueFetchFailure>,
        observed_offset: chrono::Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl TestSource {
        fn ok(delay_ms: u64) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                outcome: Ok(()),
                observed_offset: chrono::Duration::zero(),
                in_flight: Arc::default(),
                peak: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl VenueQuoteSource for TestSource {
        async fn fetch(&self, _: &TokenPair, _: U256) -> Result<PriceState, VenueFetchFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcome.clone()?;
            Ok(PriceState::constant_product(U256::from(1000u32), U256::from(1000u32))
                .with_observed_at(Utc::now() - self.observed_offset))
        }

        fn model(&self) -> LiquidityModel {
            LiquidityModel::ConstantProduct
        }
    }

    fn pair() -> TokenPair {
        TokenPair {
            token0: Token { symbol: "USDC".into(), address: Address::from_low_u64_be(1), decimals: 6 },
            token1: Token { symbol: "WETH".into(), address: Address::from_low_u64_be(2), decimals: 18 },
        }
    }

    fn venue(name: &str, source: TestSource) -> Venue {
        Venue::new(name, FeeRate::from_bps(30), Arc::new(source))
    }

    fn synchronizer(fetch_timeout_ms: u64) -> QuoteSynchronizer {
        QuoteSynchronizer::new(SyncConfig {
            fetch_timeout: Duration::from_millis(fetch_timeout_ms),
            ..SyncConfig::default()
        })
    }

    #[tokio::test]
    async fn test_all_venues_answer() {
        let venues = vec![venue("a", TestSource::ok(5)), venue("b", TestSource::ok(10))];
        let set = synchronizer(1_000).collect(&pair(), &venues, Duration::from_secs(1)).await;
        assert_eq!(set.len(), 2);
        assert_eq!(set.successful_count(), 2);
        assert!(set.quotes.values().all(|q| q.round_id == set.round_id));
    }

    #[tokio::test]
    async fn test_silent_venue_times_out_within_budget() {
        let venues = vec![
            venue("fast", TestSource::ok(5)),
            venue("silent", TestSource::ok(60_000)),
        ];
        let started = Instant::now();
        let set = synchronizer(5_000)
            .collect(&pair(), &venues, Duration::from_millis(500))
            .await;

        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(set.len(), 2);
        assert!(set.get("fast").unwrap().is_ok());
        assert!(matches!(
            set.get("silent").unwrap().failure(),
            Some(VenueFetchFailure::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_failures_are_kept_per_venue() {
        let mut broken = TestSource::ok(1);
        broken.outcome = Err(VenueFetchFailure::Network("refused".into()));
        let venues = vec![venue("ok", TestSource::ok(1)), venue("broken", broken)];
        let set = synchronizer(1_000).collect(&pair(), &venues, Duration::from_secs(1)).await;

        assert_eq!(set.successful_count(), 1);
        let failures: Vec<_> = set.failures().collect();
        assert_eq!(failures, vec![("broken", &VenueFetchFailure::Network("refused".into()))]);
    }

    #[tokio::test]
    async fn test_old_state_is_marked_stale() {
        let mut old = TestSource::ok(1);
        old.observed_offset = chrono::Duration::seconds(30);
        let venues = vec![venue("fresh", TestSource::ok(1)), venue("old", old)];
        let set = synchronizer(1_000).collect(&pair(), &venues, Duration::from_secs(1)).await;

        assert!(set.get("fresh").unwrap().is_ok());
        match set.get("old").unwrap().failure() {
            Some(VenueFetchFailure::Stale { age_ms, .. }) => assert!(*age_ms >= 25_000),
            other => panic!("expected stale failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let venues: Vec<Venue> = (0..4)
            .map(|i| {
                let mut source = TestSource::ok(20);
                source.in_flight = in_flight.clone();
                source.peak = peak.clone();
                venue(&format!("v{i}"), source)
            })
            .collect();

        let sync = QuoteSynchronizer::new(SyncConfig {
            fetch_timeout: Duration::from_secs(1),
            max_concurrent_fetches: 2,
            ..SyncConfig::default()
        });
        let set = sync.collect(&pair(), &venues, Duration::from_secs(2)).await;
        assert_eq!(set.successful_count(), 4);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_no_venues_yields_empty_set() {
        let set = synchronizer(100).collect(&pair(), &[], Duration::from_millis(100)).await;
        assert!(set.is_empty());
    }
}
