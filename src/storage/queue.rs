//! Bounded hand-off between the polling loop and slow sinks.
//!
//! `publish` waits at most `max_wait` for queue space, so a stalled
//! database or HTTP endpoint can never hold up the next round for longer
//! than that. A single worker task drains the queue into the inner sink,
//! retrying transient failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{OpportunitySink, SinkError};
use crate::types::{Opportunity, RoundReport};

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

enum Envelope {
    Opportunity(Opportunity),
    Round(RoundReport),
}

pub struct QueuedSink {
    name: String,
    tx: mpsc::Sender<Envelope>,
    max_wait: Duration,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl QueuedSink {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(
        inner: Arc<dyn OpportunitySink>,
        capacity: usize,
        max_wait: Duration,
        max_retries: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let name = format!("queued:{}", inner.name());
        let worker = tokio::spawn(drain(inner, rx, max_retries));
        Self {
            name,
            tx,
            max_wait,
            dropped: Arc::new(AtomicU64::new(0)),
            worker,
        }
    }

    /// Items discarded because the queue stayed full for `max_wait`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting items and wait for the worker to flush the queue.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(sink = %self.name, error = %e, "Sink worker ended abnormally");
        }
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), SinkError> {
        match self.tx.send_timeout(envelope, self.max_wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(sink = %self.name, dropped, "Sink queue full, dropping item");
                Err(SinkError::QueueFull(self.max_wait))
            }
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

async fn drain(inner: Arc<dyn OpportunitySink>, mut rx: mpsc::Receiver<Envelope>, max_retries: u32) {
    while let Some(envelope) = rx.recv().await {
        let mut attempt = 0;
        loop {
            let result = match &envelope {
                Envelope::Opportunity(opp) => inner.publish(opp).await,
                Envelope::Round(report) => inner.record_round(report).await,
            };
            match result {
                Ok(()) => break,
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    debug!(sink = inner.name(), attempt, error = %e, "Retrying sink write");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(sink = inner.name(), attempts = attempt + 1, error = %e, "Sink write failed, giving up");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl OpportunitySink for QueuedSink {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError> {
        self.enqueue(Envelope::Opportunity(opportunity.clone())).await
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        self.enqueue(Envelope::Round(report.clone())).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{sample_opportunity, RecordingSink};
    use tokio::sync::Notify;

    /// Blocks every publish until released.
    struct GatedSink {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl OpportunitySink for GatedSink {
        async fn publish(&self, _: &Opportunity) -> Result<(), SinkError> {
            self.gate.notified().await;
            Ok(())
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    /// Fails the first `failures` calls, then records.
    struct FlakySink {
        failures: AtomicU64,
        inner: RecordingSink,
    }

    #[async_trait]
    impl OpportunitySink for FlakySink {
        async fn publish(&self, opp: &Opportunity) -> Result<(), SinkError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Rejected("transient".into()));
            }
            self.inner.publish(opp).await
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_items_reach_inner_sink() {
        let inner = Arc::new(RecordingSink::default());
        let queued = QueuedSink::spawn(inner.clone(), 8, Duration::from_millis(50), 0);
        assert_eq!(queued.name(), "queued:recording");

        queued.publish(&sample_opportunity(1)).await.unwrap();
        queued.publish(&sample_opportunity(2)).await.unwrap();
        queued.close().await;

        assert_eq!(inner.published.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast_and_counts_drop() {
        let gate = Arc::new(Notify::new());
        let queued = QueuedSink::spawn(
            Arc::new(GatedSink { gate: gate.clone() }),
            1,
            Duration::from_millis(50),
            0,
        );

        // One item held by the worker, one in the queue, the third times out.
        queued.publish(&sample_opportunity(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queued.publish(&sample_opportunity(2)).await.unwrap();

        let started = std::time::Instant::now();
        let result = queued.publish(&sample_opportunity(3)).await;
        assert!(matches!(result, Err(SinkError::QueueFull(_))));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(queued.dropped(), 1);

        gate.notify_one();
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(FlakySink {
            failures: AtomicU64::new(2),
            inner: RecordingSink::default(),
        });
        let queued = QueuedSink::spawn(inner.clone(), 4, Duration::from_millis(50), 3);
        queued.publish(&sample_opportunity(1)).await.unwrap();
        queued.close().await;

        assert_eq!(inner.inner.published.lock().await.len(), 1);
    }
}
