//! Jittered exponential backoff
//!
//! Two flavours are used: recovery retries draw from
//! `[0.6 * current, current]`, telemetry delivery retries from
//! `[0.5 * current, current]`. Both double the timeout after every use up to
//! a ceiling and fall back to the initial value after a success.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Stateful delay generator
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    /// Timeout after a reset (seconds)
    initial: f64,
    /// Upper bound for the timeout (seconds)
    max: f64,
    /// Timeout used for the next delay (seconds)
    current: f64,
    /// Share of the timeout that is always waited
    fixed_ratio: f64,
    rng: fastrand::Rng,
}

impl BackoffTimer {
    /// Backoff for recovery retries
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self::with_ratio(initial, max, 0.6)
    }

    /// Backoff for telemetry delivery retries
    pub fn for_delivery(initial: Duration, max: Duration) -> Self {
        Self::with_ratio(initial, max, 0.5)
    }

    fn with_ratio(initial: Duration, max: Duration, fixed_ratio: f64) -> Self {
        let initial = initial.as_secs_f64();
        Self {
            initial,
            max: max.as_secs_f64().max(initial),
            current: initial,
            fixed_ratio,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_secs_f64(config.initial_timeout_secs),
            Duration::from_secs_f64(config.max_timeout_secs),
        )
    }

    /// Use a seeded random source
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Timeout the next delay is drawn from
    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.current)
    }

    /// Draw the next delay and grow the timeout
    pub fn next_delay(&mut self) -> Duration {
        let current = self.current;
        let jitter = 1.0 - self.fixed_ratio;
        let delay = self.fixed_ratio * current + jitter * current * self.rng.f64();

        self.current = (current * 2.0).min(self.max);
        Duration::from_secs_f64(delay)
    }

    /// Back to the initial timeout after a success
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for BackoffTimer {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_in_range() {
        for seed in 0..100 {
            let mut backoff = BackoffTimer::default().with_seed(seed);
            let delay = backoff.next_delay().as_secs_f64();
            assert!((3.0..=5.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_timeout_doubles_and_caps() {
        let mut backoff = BackoffTimer::default();
        assert_eq!(backoff.current(), Duration::from_secs(5));
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(10));
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(15));
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(15));
    }

    #[test]
    fn test_delays_bounded_by_max() {
        let mut backoff = BackoffTimer::default().with_seed(7);
        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut backoff = BackoffTimer::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    #[test]
    fn test_delivery_jitter_range() {
        for seed in 0..100 {
            let mut backoff =
                BackoffTimer::for_delivery(Duration::from_secs(3), Duration::from_secs(300))
                    .with_seed(seed);
            let first = backoff.next_delay().as_secs_f64();
            assert!((1.5..=3.0).contains(&first));
            let second = backoff.next_delay().as_secs_f64();
            assert!((3.0..=6.0).contains(&second));
        }
    }
}
