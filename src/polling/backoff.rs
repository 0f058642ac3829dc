use std::time::Duration;

/// Exponential backoff bounded by `min_delay` and `max_delay`.
///
/// The delay slept after the `n`-th failed attempt (1-based) is
/// `min_delay * multiplier^(n-1)`, clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(min_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn resource_check() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 2.0)
    }

    pub fn job_completion() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(32), 2.0)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.min_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // powi overflows to inf long before the cap matters
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped).max(self.min_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::resource_check()
    }
}
