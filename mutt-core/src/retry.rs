//! Data-driven retry policy.
//!
//! Delays are computed from the policy rather than inline control flow so
//! the schedule is testable in isolation.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Jittered delay before retry number `attempt` (zero-based):
    /// `min(max_delay, base * 2^attempt) * rand(0.5, 1.5)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0.5..1.5);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic core of [`delay`](Self::delay).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self
            .base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_delay);
        exp.mul_f64(jitter)
    }

    /// True once `attempt` failures have been recorded and no further try
    /// is allowed.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(0, 1.0), Duration::from_millis(100));
        assert_eq!(p.delay_with_jitter(1, 1.0), Duration::from_millis(200));
        assert_eq!(p.delay_with_jitter(2, 1.0), Duration::from_millis(400));
    }

    #[test]
    fn delay_caps_at_max_before_jitter() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(10, 1.0), Duration::from_secs(5));
        // Jitter applies after the cap, per policy.
        assert_eq!(p.delay_with_jitter(10, 1.5), Duration::from_millis(7500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy();
        for _ in 0..100 {
            let d = p.delay(0);
            assert!(d >= Duration::from_millis(50));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[test]
    fn exhaustion_counts_attempts() {
        let p = policy();
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
        assert!(p.exhausted(4));
    }

    #[test]
    fn saturates_on_huge_attempt_numbers() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(u32::MAX, 1.0), Duration::from_secs(5));
    }
}
