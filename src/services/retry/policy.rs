//! Retry policy and backoff calculation
//!
//! Delays grow exponentially from `base_delay`, are capped at `max_delay`,
//! and are then perturbed by up to `jitter_fraction` of their value so that
//! concurrent callers do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound on the pre-jitter delay
    pub max_delay: Duration,

    /// Fraction of the delay used as jitter amplitude (0.2 = ±20%)
    pub jitter_fraction: f64,

    /// Hard deadline for each attempt
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
            per_attempt_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter amplitude; clamped to `[0, 1]`, NaN becomes 0
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Build delays from seconds; negative or non-finite values become zero
    pub fn with_delay_secs(self, base_secs: f64, max_secs: f64) -> Self {
        self.with_base_delay(secs_to_duration(base_secs))
            .with_max_delay(secs_to_duration(max_secs))
    }

    /// Attempts actually made; at least one
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pre-jitter delay after attempt `attempt` (0-indexed):
    /// `min(base_delay * 2^attempt, max_delay)`
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_nanos();
        if base == 0 {
            return Duration::ZERO;
        }
        // Saturating: any overflow lands on the cap
        let cap = self.max_delay.as_nanos();
        let scaled = 1u128
            .checked_shl(attempt)
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(u128::MAX);
        if scaled >= cap {
            return self.max_delay;
        }
        const NANOS_PER_SEC: u128 = 1_000_000_000;
        // scaled < cap, so the seconds fit in u64
        Duration::new(
            (scaled / NANOS_PER_SEC) as u64,
            (scaled % NANOS_PER_SEC) as u32,
        )
    }

    /// Apply jitter to `delay` for a given `unit` in `[-1, 1]`:
    /// `delay + delay * jitter_fraction * unit`
    pub fn apply_jitter(&self, delay: Duration, unit: f64) -> Duration {
        let unit = if unit.is_nan() { 0.0 } else { unit.clamp(-1.0, 1.0) };
        let secs = delay.as_secs_f64();
        secs_to_duration(secs + secs * self.jitter_fraction * unit)
    }

    /// Capped delay with a random jitter draw
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if self.jitter_fraction == 0.0 || delay.is_zero() {
            return delay;
        }
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.apply_jitter(delay, unit)
    }

    /// Largest sleep any attempt can produce
    pub fn worst_case_delay(&self) -> Duration {
        self.apply_jitter(self.max_delay, 1.0)
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Retry policy presets for the two calling patterns
pub mod presets {
    use super::*;

    /// Backoff-only retry around a single LLM CLI call
    pub fn claude() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter_fraction(0.2)
    }

    /// One attempt per credential; rotation replaces backoff
    pub fn rotate() -> RetryPolicy {
        RetryPolicy::new().with_max_attempts(1)
    }

    /// No retry at all
    pub fn no_retry() -> RetryPolicy {
        RetryPolicy::new().with_max_attempts(1).with_jitter_fraction(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.jitter_fraction, 0.2);
    }

    #[test]
    fn test_backoff_examples() {
        let policy = policy();
        assert_eq!(policy.base_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(3), Duration::from_secs(8));
        assert_eq!(policy.base_backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..80 {
            let delay = policy.base_backoff(attempt);
            assert!(delay >= previous, "attempt {} shrank", attempt);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_tiny_base_reaches_large_cap() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_nanos(1))
            .with_max_delay(Duration::from_secs(3600));
        // 2^40 ns is about 18 minutes, 2^42 ns passes the hour
        assert_eq!(policy.base_backoff(40), Duration::from_nanos(1 << 40));
        assert_eq!(policy.base_backoff(42), Duration::from_secs(3600));
        assert_eq!(policy.base_backoff(200), Duration::from_secs(3600));
        assert_eq!(policy.base_backoff(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_zero_base_stays_zero() {
        let policy = RetryPolicy::new().with_base_delay(Duration::ZERO);
        assert_eq!(policy.base_backoff(0), Duration::ZERO);
        assert_eq!(policy.base_backoff(500), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy().with_jitter_fraction(0.2);
        for attempt in 0..12 {
            let delay = policy.base_backoff(attempt);
            let low = delay.mul_f64(0.8);
            let high = delay.mul_f64(1.2);
            for _ in 0..50 {
                let jittered = policy.jittered_backoff(attempt);
                // Allow a few nanoseconds of float rounding at either edge
                assert!(jittered + Duration::from_nanos(10) >= low, "{:?} < {:?}", jittered, low);
                assert!(jittered <= high + Duration::from_nanos(10), "{:?} > {:?}", jittered, high);
            }
        }
    }

    #[test]
    fn test_apply_jitter_extremes() {
        let policy = policy().with_jitter_fraction(0.2);
        let delay = Duration::from_secs(10);
        assert_eq!(policy.apply_jitter(delay, 0.0), delay);
        assert_eq!(policy.apply_jitter(delay, 1.0), Duration::from_secs(12));
        assert_eq!(policy.apply_jitter(delay, -1.0), Duration::from_secs(8));
        // Out-of-range units are clamped
        assert_eq!(policy.apply_jitter(delay, 5.0), Duration::from_secs(12));
    }

    #[test]
    fn test_worst_case_delay() {
        let policy = policy().with_jitter_fraction(0.2);
        assert_eq!(policy.worst_case_delay(), Duration::from_secs(72));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new().with_max_attempts(0).effective_attempts(), 1);
    }

    #[test]
    fn test_jitter_fraction_clamped() {
        assert_eq!(RetryPolicy::new().with_jitter_fraction(3.0).jitter_fraction, 1.0);
        assert_eq!(RetryPolicy::new().with_jitter_fraction(-1.0).jitter_fraction, 0.0);
        assert_eq!(RetryPolicy::new().with_jitter_fraction(f64::NAN).jitter_fraction, 0.0);
    }

    #[test]
    fn test_delay_secs_sanitized() {
        let policy = RetryPolicy::new().with_delay_secs(-1.0, f64::INFINITY);
        assert_eq!(policy.base_delay, Duration::ZERO);
        assert_eq!(policy.max_delay, Duration::ZERO);

        let policy = RetryPolicy::new().with_delay_secs(0.5, 30.0);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_presets() {
        assert_eq!(presets::claude().max_attempts, 3);
        assert_eq!(presets::rotate().max_attempts, 1);
        assert_eq!(presets::no_retry().jitter_fraction, 0.0);
    }
}
