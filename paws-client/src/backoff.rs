//! Reconnect backoff.

use std::time::Duration;

/// Backoff settings for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry after a connection is lost.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after every failed attempt.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            factor: std::f64::consts::E,
        }
    }
}

impl BackoffConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }
}

/// Growing delay between reconnect attempts.
///
/// Delays never decrease until [`Backoff::reset`] and never exceed
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Returns the delay to wait before the next attempt and grows it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);

        let grown = delay.as_nanos() as f64 * self.config.factor.max(1.0);
        let max = self.config.max_delay;
        self.current = if grown.is_finite() && grown < max.as_nanos() as f64 {
            Duration::from_nanos(grown as u64).max(delay)
        } else {
            max
        };

        delay
    }

    /// Returns the delay to minimum after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_growth() {
        let mut backoff = Backoff::new(
            BackoffConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(1000))
                .with_factor(2.0),
        );

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_factor_below_one_is_clamped() {
        let mut backoff = Backoff::new(
            BackoffConfig::default()
                .with_initial_delay(Duration::from_millis(10))
                .with_factor(0.5),
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_initial_above_max() {
        let mut backoff = Backoff::new(
            BackoffConfig::default()
                .with_initial_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(5)),
        );
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_delays_monotonic_and_capped(
            initial_ms in 1u64..5_000,
            max_ms in 1u64..600_000,
            factor in 1.0f64..10.0,
            steps in 1usize..64,
            reset_at in 0usize..64,
        ) {
            let config = BackoffConfig::default()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms))
                .with_factor(factor);
            let floor = config.initial_delay.min(config.max_delay);
            let mut backoff = Backoff::new(config);

            let mut previous = Duration::ZERO;
            for step in 0..steps {
                if step == reset_at {
                    backoff.reset();
                    prop_assert_eq!(backoff.next_delay(), floor);
                    previous = floor;
                    continue;
                }
                let delay = backoff.next_delay();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_millis(max_ms));
                previous = delay;
            }
        }
    }
}
