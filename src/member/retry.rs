//! Retry with exponential backoff and jittered scheduling for heartbeats

use std::time::Duration;

use rand::Rng;

/// Retry policy for a single heartbeat tick
///
/// Controls how many times a failed send is attempted and how
/// long to wait between attempts using exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per tick, including the first
    pub max_attempts: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Compute the delay before retry number `attempt` (0-based).
///
/// `min(base_delay * 2^attempt + jitter, max_delay)` where jitter is
/// 0-25% of the exponential term.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..=0.25));

    (base + jitter).min(policy.max_delay)
}

/// Pick the next heartbeat interval uniformly from `[min, max]`
///
/// Spreads the fleet's heartbeats so nodes booted together do not report in
/// lockstep. A reversed range collapses to `min`.
#[must_use]
pub fn jittered_interval(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };

        let d0 = delay_for_attempt(&policy, 0);
        let d2 = delay_for_attempt(&policy, 2);

        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(125));
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(500));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(delay_for_attempt(&policy, 8), Duration::from_secs(5));
        // Overflowing exponent saturates instead of panicking
        assert_eq!(delay_for_attempt(&policy, 64), Duration::from_secs(5));
    }

    #[test]
    fn jittered_interval_within_bounds() {
        let min = Duration::from_secs(15);
        let max = Duration::from_secs(30);
        for _ in 0..200 {
            let d = jittered_interval(min, max);
            assert!(d >= min && d <= max, "{d:?} out of range");
        }
    }

    #[test]
    fn degenerate_range_uses_min() {
        let d = Duration::from_secs(10);
        assert_eq!(jittered_interval(d, d), d);
        assert_eq!(jittered_interval(d, Duration::from_secs(1)), d);
    }
}
