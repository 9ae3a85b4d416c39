//! Reconnection backoff with jitter
//!
//! The engine owns the retry loop; this module only answers "how long until
//! attempt `n`" and "is attempt `n` allowed".

use rand::Rng;
use std::time::Duration;

use crate::config::TerminalConfig;

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling applied before jitter
    pub max_backoff: Duration,
    /// Multiplier per attempt
    pub factor: f64,
    /// Fraction of the bounded delay used as +/- jitter range
    pub jitter: f64,
    /// Maximum number of attempts (None = infinite)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.1,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Build policy from terminal tunables; a negative attempt bound is unlimited
    pub fn from_config(config: &TerminalConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.base_reconnect_interval_ms),
            max_backoff: Duration::from_millis(config.max_reconnect_interval_ms),
            factor: config.backoff_factor,
            jitter: config.jitter_factor,
            max_attempts: u32::try_from(config.max_reconnect_attempts).ok(),
        }
    }

    /// Delay before 0-indexed attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`delay`](Self::delay) with a caller-supplied RNG
    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * 1000.0;
        let max = self.max_backoff.as_secs_f64() * 1000.0;

        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base * self.factor.powi(exp);
        // powi overflows to inf (or NaN for 0 * inf) on long outages
        let bounded = if raw.is_finite() { raw.min(max) } else { max };

        let range = bounded * self.jitter;
        let offset = range * (rng.gen::<f64>() * 2.0 - 1.0);
        let millis = (bounded + offset).max(0.0);

        // huge jitter or intervals overflow Duration
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(self.max_backoff)
    }

    /// Upper bound any [`delay`](Self::delay) can return
    pub fn max_delay(&self) -> Duration {
        self.max_backoff.mul_f64(1.0 + self.jitter.max(0.0))
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_policy_default() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn test_policy_from_config() {
        let config = TerminalConfig::new("d", "t", "wss://example.com/ws", "tn", "p", "k")
            .with_max_reconnect_attempts(3)
            .with_reconnect_intervals(Duration::from_millis(200), Duration::from_secs(5));
        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));

        let unlimited = ReconnectPolicy::from_config(&config.with_max_reconnect_attempts(-1));
        assert_eq!(unlimited.max_attempts, None);
    }

    #[test]
    fn test_delay_without_jitter_is_exponential() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_bounds_with_jitter() {
        let policy = ReconnectPolicy {
            jitter: 0.5,
            ..ReconnectPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..64 {
            let delay = policy.delay_with(attempt, &mut rng);
            assert!(delay <= policy.max_delay(), "attempt {}: {:?}", attempt, delay);
        }

        // jitter stays within +/- range around the bounded value
        for _ in 0..100 {
            let delay = policy.delay_with(0, &mut rng);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_delay_never_negative() {
        let policy = ReconnectPolicy {
            jitter: 3.0,
            ..ReconnectPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        for attempt in 0..16 {
            let delay = policy.delay_with(attempt, &mut rng);
            assert!(delay <= policy.max_delay());
        }
    }

    #[test]
    fn test_delay_saturates_on_overflow() {
        let policy = ReconnectPolicy {
            max_backoff: Duration::from_secs(u64::MAX),
            factor: 10.0,
            jitter: f64::MAX,
            ..ReconnectPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in [0, 40, u32::MAX] {
            let delay = policy.delay_with(attempt, &mut rng);
            assert!(delay <= policy.max_backoff);
        }
    }

    #[test]
    fn test_should_retry() {
        let limited = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(limited.should_retry(0));
        assert!(limited.should_retry(1));
        assert!(!limited.should_retry(2));

        let never = ReconnectPolicy {
            max_attempts: Some(0),
            ..ReconnectPolicy::default()
        };
        assert!(!never.should_retry(0));

        assert!(ReconnectPolicy::default().should_retry(u32::MAX));
    }
}
