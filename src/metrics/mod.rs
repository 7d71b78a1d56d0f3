mod server;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics - Prometheus Observability for the Outbox
// ============================================================================
//
// The dispatcher is background-only, so these counters are the primary way
// to see what it is doing: how many records flow through, how often publish
// attempts fail, how deep the backlog is, and whether the Kafka circuit
// breaker is open. A record entering the failed state increments
// `outbox_records_dead_total`; alert on that, those records need a human.
//
// Scraped via /metrics on the standalone metrics server.
//
// ============================================================================

pub struct OutboxMetrics {
    registry: Registry,

    // Dispatch outcomes
    pub records_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub records_dead: IntCounter,

    // Claim coordination
    pub claim_conflicts: IntCounter,
    pub stale_claims_released: IntCounter,

    // Latency and backlog
    pub publish_duration: Histogram,
    pub outbox_pending: IntGauge,

    // Publisher circuit breaker (0=Closed, 1=Open, 2=HalfOpen)
    pub breaker_state: IntGauge,
}

impl OutboxMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let records_published = IntCounterVec::new(
            Opts::new(
                "outbox_records_published_total",
                "Outbox records delivered to the broker",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(records_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new(
                "outbox_publish_failures_total",
                "Failed publish attempts (each one schedules a retry or kills the record)",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let records_dead = IntCounter::new(
            "outbox_records_dead_total",
            "Records marked failed after exhausting their retry budget",
        )?;
        registry.register(Box::new(records_dead.clone()))?;

        let claim_conflicts = IntCounter::new(
            "outbox_claim_conflicts_total",
            "Claims lost to a concurrent dispatcher instance",
        )?;
        registry.register(Box::new(claim_conflicts.clone()))?;

        let stale_claims_released = IntCounter::new(
            "outbox_stale_claims_released_total",
            "In-progress claims returned to pending after their owner went away",
        )?;
        registry.register(Box::new(stale_claims_released.clone()))?;

        let publish_duration = Histogram::with_opts(
            HistogramOpts::new(
                "outbox_publish_duration_seconds",
                "Wall time of a single publish attempt",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        let outbox_pending = IntGauge::new(
            "outbox_pending_records",
            "Records waiting to be published",
        )?;
        registry.register(Box::new(outbox_pending.clone()))?;

        let breaker_state = IntGauge::new(
            "outbox_publisher_breaker_state",
            "Kafka publisher circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        Ok(Self {
            registry,
            records_published,
            publish_failures,
            records_dead,
            claim_conflicts,
            stale_claims_released,
            publish_duration,
            outbox_pending,
            breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_without_collision() {
        let metrics = OutboxMetrics::new().unwrap();
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_counters_are_usable() {
        let metrics = OutboxMetrics::new().unwrap();

        metrics
            .records_published
            .with_label_values(&["ProfileUpdated"])
            .inc();
        metrics.records_dead.inc();
        metrics.outbox_pending.set(7);

        assert_eq!(
            metrics
                .records_published
                .with_label_values(&["ProfileUpdated"])
                .get(),
            1
        );
        assert_eq!(metrics.outbox_pending.get(), 7);
    }
}
