use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::errors::StoreError;
use super::record::OutboxRecord;
use super::store::OutboxStore;
use crate::messaging::EventPublisher;
use crate::metrics::OutboxMetrics;
use crate::utils::BackoffPolicy;

// ============================================================================
// Outbox Dispatcher
// ============================================================================
//
// Background task that drains the outbox:
//
// 1. Fetch due pending records, oldest first.
// 2. Claim each one (compare-and-set PENDING -> IN_PROGRESS); a lost claim
//    means another instance has it.
// 3. Publish; on success mark PUBLISHED, on failure reschedule with
//    exponential backoff, or mark FAILED once the attempt budget is spent.
//
// Per-aggregate ordering is enforced by the store: `fetch_due` returns only
// the head record of each aggregate, so a head sitting in backoff, claimed
// by another instance, or parked as failed keeps the rest of its aggregate
// out of every pass until it is published. Different aggregates don't wait
// on one another.
//
// Delivery is at-least-once. A crash between publish and mark_published
// leaves the record claimed; the stale-claim sweep returns it to PENDING and
// it is published again, which is why every message carries the record id as
// a dedup key.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Pause between polls of the outbox table
    pub poll_interval: Duration,
    /// Maximum records taken per pass
    pub batch_size: usize,
    /// Publish attempts before a record is marked failed
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Claims older than this are treated as abandoned
    pub claim_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Dispatcher<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    config: DispatcherConfig,
    metrics: Arc<OutboxMetrics>,
}

impl<S: OutboxStore, P: EventPublisher> Dispatcher<S, P> {
    pub fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        config: DispatcherConfig,
        metrics: Arc<OutboxMetrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics,
        }
    }

    /// Poll until the shutdown signal flips. The pass in flight when the
    /// signal arrives runs to completion; anything still claimed after a
    /// hard kill is recovered by the stale-claim sweep on restart.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "outbox dispatcher started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "dispatch pass failed");
                    }
                }
            }
        }

        tracing::info!("outbox dispatcher stopped");
    }

    async fn tick(&self) -> Result<(), StoreError> {
        let cutoff = Utc::now() - chrono_duration(self.config.claim_timeout);
        let released = self.store.release_stale_claims(cutoff).await?;
        if released > 0 {
            self.metrics.stale_claims_released.inc_by(released);
            tracing::warn!(released, "released stale outbox claims");
        }

        self.dispatch_pending().await?;

        let pending = self.store.pending_count().await?;
        self.metrics.outbox_pending.set(pending);

        Ok(())
    }

    /// One dispatch pass. Returns how many records were published.
    pub async fn dispatch_pending(&self) -> Result<usize, StoreError> {
        let due = self
            .store
            .fetch_due(self.config.batch_size, Utc::now())
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        tracing::debug!(count = due.len(), "fetched due outbox records");

        let mut published = 0;

        for record in due {
            let claimed = match self.store.claim(record.id).await? {
                Some(claimed) => claimed,
                None => {
                    self.metrics.claim_conflicts.inc();
                    tracing::debug!(
                        record_id = %record.id,
                        "record claimed by another dispatcher, skipping"
                    );
                    continue;
                }
            };

            if self.publish_one(claimed).await? {
                published += 1;
            }
        }

        Ok(published)
    }

    async fn publish_one(&self, record: OutboxRecord) -> Result<bool, StoreError> {
        let timer = self.metrics.publish_duration.start_timer();
        let result = self.publisher.publish(&record).await;
        timer.observe_duration();

        match result {
            Ok(()) => {
                self.store.mark_published(record.id).await?;
                self.metrics
                    .records_published
                    .with_label_values(&[record.event_type.as_str()])
                    .inc();
                Ok(true)
            }
            Err(e) => {
                self.metrics
                    .publish_failures
                    .with_label_values(&[record.event_type.as_str()])
                    .inc();

                let attempts = record.attempts + 1;
                if attempts as u32 >= self.config.max_attempts {
                    self.store
                        .mark_failed(record.id, attempts, &e.to_string())
                        .await?;
                    self.metrics.records_dead.inc();
                    tracing::error!(
                        record_id = %record.id,
                        aggregate_id = %record.aggregate_id,
                        event_type = %record.event_type,
                        correlation_id = %record.correlation_id,
                        attempts,
                        error = %e,
                        "record exhausted its retry budget, marked failed"
                    );
                } else {
                    let delay = self.config.backoff.delay(attempts as u32);
                    let next_attempt_at = Utc::now() + chrono_duration(delay);
                    self.store
                        .reschedule(record.id, attempts, &e.to_string(), next_attempt_at)
                        .await?;
                    tracing::warn!(
                        record_id = %record.id,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "publish failed, rescheduled"
                    );
                }
                Ok(false)
            }
        }
    }
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(d.as_millis() as i64)
}

// ============================================================================
// Tests
// ============================================================================
