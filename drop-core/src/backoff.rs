//! Retry policy with exponential backoff and jitter.
//!
//! Used by the client for rate-limited and transient remote failures.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Attempt numbers start at 1 (the first call). The delay after attempt
/// `n` is `min(max_delay, base_delay * 2^(n-1))` plus up to 25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay after `attempt` failed, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after `attempt` failed, with random jitter.
    ///
    /// Jitter prevents clients that were throttled together from retrying
    /// in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(random_u64() % (spread + 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    // Jitter is best-effort; zero jitter is an acceptable fallback.
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn base_delay_doubles() {
        let p = policy();
        assert_eq!(p.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(p.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(p.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(p.base_delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn base_delay_is_capped() {
        let p = policy();
        assert_eq!(p.base_delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.base_delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let p = policy();
        for attempt in 1..=6 {
            let base = p.base_delay_for(attempt);
            for _ in 0..50 {
                let d = p.delay_for(attempt);
                assert!(d >= base);
                assert!(d <= base + base / 4);
            }
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(4));
        assert!(!p.should_retry(5));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }
}
