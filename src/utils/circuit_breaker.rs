use prometheus::IntGauge;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker for the Kafka Publisher
// ============================================================================
//
// When the broker is down, every send costs a full delivery timeout. The
// breaker trips after a run of consecutive failures so the dispatcher fails
// fast (records stay PENDING and get rescheduled) instead of stacking up
// timeouts on every poll.
//
// States:
// - Closed:   sends pass through
// - Open:     sends rejected immediately until the cooldown elapses
// - HalfOpen: probe sends allowed; enough successes close the circuit again
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_gauge_value(self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub cooldown: Duration,
    /// Consecutive probe successes needed to close again
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

pub struct Breaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
    state_gauge: Option<IntGauge>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            }),
            config,
            state_gauge: None,
        }
    }

    /// Mirror state transitions into a Prometheus gauge (0=Closed, 1=Open, 2=HalfOpen).
    pub fn with_gauge(mut self, gauge: IntGauge) -> Self {
        gauge.set(BreakerState::Closed.as_gauge_value());
        self.state_gauge = Some(gauge);
        self
    }

    /// Whether a send may proceed right now. An open circuit transitions to
    /// half-open once the cooldown has elapsed.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);

                if cooled_down {
                    tracing::info!("circuit breaker half-open, allowing probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    self.record_state(BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;

        if inner.state == BreakerState::HalfOpen {
            inner.probe_successes += 1;
            if inner.probe_successes >= self.config.success_threshold {
                tracing::info!(
                    probes = inner.probe_successes,
                    "circuit breaker closed after successful probes"
                );
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                self.record_state(BreakerState::Closed);
            }
        }
    }

    pub async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;

        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker tripped open"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    self.record_state(BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("probe failed, circuit breaker reopened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_successes = 0;
                self.record_state(BreakerState::Open);
            }
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    fn record_state(&self, state: BreakerState) {
        if let Some(gauge) = &self.state_gauge {
            gauge.set(state.as_gauge_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, cooldown: Duration, success_threshold: u32) -> Breaker {
        Breaker::new(BreakerConfig {
            failure_threshold,
            cooldown,
            success_threshold,
        })
    }

    #[tokio::test]
    async fn test_trips_open_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60), 2);

        for _ in 0..3 {
            assert!(cb.allow_request().await);
            cb.on_failure().await;
        }

        assert_eq!(cb.state().await, BreakerState::Open);
        assert!(!cb.allow_request().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let cb = breaker(3, Duration::from_secs(60), 2);

        cb.on_failure().await;
        cb.on_failure().await;
        cb.on_success().await;
        cb.on_failure().await;
        cb.on_failure().await;

        // The run was broken by a success, so the circuit is still closed
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_circuit() {
        let cb = breaker(2, Duration::from_millis(50), 1);

        cb.on_failure().await;
        cb.on_failure().await;
        assert_eq!(cb.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.allow_request().await);
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.on_success().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_circuit() {
        let cb = breaker(2, Duration::from_millis(50), 1);

        cb.on_failure().await;
        cb.on_failure().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.allow_request().await);

        cb.on_failure().await;
        assert_eq!(cb.state().await, BreakerState::Open);
        assert!(!cb.allow_request().await);
    }
}
