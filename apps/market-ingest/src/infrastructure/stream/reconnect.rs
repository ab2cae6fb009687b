//! Reconnection Policy
//!
//! Exponential backoff for the streaming connection:
//! `delay = min(initial * 2^(attempt - 1), max)`, optionally jittered.
//!
//! The policy never gives up. When a bounded attempt count is reached the
//! counter silently starts over, so the next failure waits the initial delay
//! again.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Attempts before the counter starts over (0 = never).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

/// Reconnection policy implementing capped exponential backoff.
///
/// # Example
///
/// ```rust
/// use market_ingest::infrastructure::stream::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.next_delay(), Duration::from_secs(10));
///
/// // Streaming resumed
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
    total_attempts: u64,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
            total_attempts: 0,
        }
    }

    /// Record a failure and return how long to wait before reconnecting.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count += 1;
        self.total_attempts += 1;

        let exponent = self.attempt_count.saturating_sub(1).min(31);
        let delay = self
            .config
            .initial_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.config.max_delay);

        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            tracing::warn!(
                attempts = self.attempt_count,
                "Maximum reconnect attempts reached, starting over"
            );
            self.attempt_count = 0;
        }

        self.apply_jitter(delay)
    }

    /// Reset the policy after the connection streamed successfully.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Attempts since the policy was created.
    #[must_use]
    pub const fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    fn secs(policy: &mut ReconnectPolicy, n: usize) -> Vec<u64> {
        (0..n).map(|_| policy.next_delay().as_secs()).collect()
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut policy = ReconnectPolicy::new(config(0));
        assert_eq!(secs(&mut policy, 7), vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[test]
    fn reset_restarts_at_initial_delay() {
        let mut policy = ReconnectPolicy::new(config(0));
        let _ = secs(&mut policy, 3);
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.total_attempts(), 4);
    }

    #[test]
    fn attempt_cap_starts_over_instead_of_stopping() {
        let mut policy = ReconnectPolicy::new(config(3));
        assert_eq!(secs(&mut policy, 7), vec![5, 10, 20, 5, 10, 20, 5]);
        assert_eq!(policy.attempt_count(), 1);
    }

    #[test]
    fn many_failures_never_overflow() {
        let mut policy = ReconnectPolicy::new(config(0));
        for _ in 0..1000 {
            assert!(policy.next_delay() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..config(0)
            });
            let millis = policy.next_delay().as_millis();
            assert!((4500..=5500).contains(&millis), "delay {millis}ms out of range");
        }
    }
}
