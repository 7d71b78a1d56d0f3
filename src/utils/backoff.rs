use std::time::Duration;

// ============================================================================
// Exponential Backoff Policy
// ============================================================================
//
// Computes the delay before the next publish attempt of an outbox record.
// The dispatcher never sleeps on a failing record; it stores the computed
// `next_attempt_at` and moves on, so one bad record cannot park the loop.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Delay applied after the first failure
    pub initial: Duration,
    /// Upper bound for the computed delay
    pub max: Duration,
    /// Growth factor between consecutive attempts
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the given attempt number (1-based) has failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial.min(self.max);
        }

        let factor = self.multiplier.powi((attempt - 1) as i32);
        let millis = (self.initial.as_millis() as f64) * factor;
        let capped = millis.min(self.max.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }
}
