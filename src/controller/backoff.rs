//! # Backoff
//!
//! Exponential backoff for token re-authentication and the jittered
//! per-object delay used when a reconciliation fails.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vals_secret_controller::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(
//!     Duration::from_millis(100),
//!     Duration::from_secs(1),
//!     2.0,
//!     0, // unbounded
//! );
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::constants::{
    ERROR_BACKOFF_FACTOR, ERROR_BACKOFF_JITTER_FRACTION, ERROR_BACKOFF_MAX_SECS,
    ERROR_BACKOFF_MIN_SECS,
};

/// Exponential backoff calculator
///
/// Each call to [`ExponentialBackoff::next_backoff`] returns the current delay and
/// multiplies it for the next call, capped at `max`. With `max_attempts > 0` the
/// sequence is bounded and yields `Duration::ZERO` once exhausted.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    /// 0 means unbounded
    max_attempts: u32,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    ///
    /// # Arguments
    ///
    /// * `initial` - First delay returned
    /// * `max` - Ceiling for every delay
    /// * `multiplier` - Growth factor applied after each call
    /// * `max_attempts` - Number of delays handed out before exhaustion, 0 for unbounded
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            multiplier,
            max_attempts,
            current: initial,
            attempts: 0,
        }
    }

    /// Backoff used by the token lifecycle manager: 5s, 10s, 20s, 40s, 60s...
    #[must_use]
    pub fn for_token_renewal() -> Self {
        use crate::constants::{
            TOKEN_BACKOFF_INITIAL_SECS, TOKEN_BACKOFF_MAX_SECS, TOKEN_BACKOFF_MULTIPLIER,
        };
        Self::new(
            Duration::from_secs(TOKEN_BACKOFF_INITIAL_SECS),
            Duration::from_secs(TOKEN_BACKOFF_MAX_SECS),
            TOKEN_BACKOFF_MULTIPLIER,
            0,
        )
    }

    /// Get the next delay and advance the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use vals_secret_controller::controller::backoff::ExponentialBackoff;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 2.0, 1);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// assert_eq!(backoff.next_backoff(), Duration::ZERO); // exhausted
    /// ```
    pub fn next_backoff(&mut self) -> Duration {
        if !self.should_attempt() {
            return Duration::ZERO;
        }

        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        self.attempts += 1;
        delay
    }

    /// Restore the initial delay and forget past attempts
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// True while unbounded or attempts remain
    #[must_use]
    pub fn should_attempt(&self) -> bool {
        self.max_attempts == 0 || self.attempts < self.max_attempts
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Sleep for the next delay
    pub async fn wait(&mut self) {
        let delay = self.next_backoff();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Delay before retrying a failed reconciliation
///
/// `3s + round(1.5^failures)s`, clamped to `[3s, 120s]`, then shifted by up to
/// +/-10%. `jitter_sample` is a uniform sample in `[0, 1)`; 0.5 means no jitter.
#[must_use]
pub fn reconcile_error_delay(failures: u32, jitter_sample: f64) -> Duration {
    let min = Duration::from_secs(ERROR_BACKOFF_MIN_SECS);
    let max = Duration::from_secs(ERROR_BACKOFF_MAX_SECS);

    let growth = ERROR_BACKOFF_FACTOR.powf(f64::from(failures)).round();
    let base = if growth.is_finite() && growth < max.as_secs_f64() {
        (min + Duration::from_secs_f64(growth)).clamp(min, max)
    } else {
        max
    };

    let jitter_ms =
        ((jitter_sample - 0.5) * base.as_secs_f64() * 1000.0 * (ERROR_BACKOFF_JITTER_FRACTION * 2.0))
            .round();
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "jitter is bounded by 10% of a delay of at most 120s"
    )]
    let jitter = Duration::from_millis(jitter_ms.abs() as u64);

    if jitter_ms < 0.0 {
        base.saturating_sub(jitter)
    } else {
        base + jitter
    }
}

/// Consecutive reconciliation failures per object, keyed `namespace/name`
///
/// Held in process memory only.
#[derive(Debug, Default)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<String, u32>>,
}

impl ErrorBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure for `key` and return the jittered requeue delay
    pub fn record_failure(&self, key: &str) -> Duration {
        let count = {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry = failures.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        reconcile_error_delay(count, rand::thread_rng().gen::<f64>())
    }

    /// Forget the failures of `key` after a success or deletion
    pub fn clear(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Current failure count for `key`
    #[must_use]
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence_caps_at_max() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0,
        );

        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(800));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000)); // capped
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
        assert!(backoff.should_attempt());
    }

    #[test]
    fn test_bounded_attempts_exhaust() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            5,
        );

        for _ in 0..5 {
            assert!(backoff.should_attempt());
            assert!(!backoff.next_backoff().is_zero());
        }
        assert_eq!(backoff.attempt_count(), 5);
        assert!(!backoff.should_attempt());
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
        assert_eq!(backoff.attempt_count(), 5); // exhaustion does not count
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            2,
        );
        backoff.next_backoff();
        backoff.next_backoff();
        assert!(!backoff.should_attempt());

        backoff.reset();

        assert!(backoff.should_attempt());
        assert_eq!(backoff.attempt_count(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_token_renewal_backoff() {
        let mut backoff = ExponentialBackoff::for_token_renewal();
        let secs: Vec<u64> = (0..6).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_reconcile_error_delay_without_jitter() {
        // 1.5^1 rounds to 2, 1.5^2 to 2, 1.5^5 to 8
        assert_eq!(reconcile_error_delay(1, 0.5), Duration::from_secs(5));
        assert_eq!(reconcile_error_delay(2, 0.5), Duration::from_secs(5));
        assert_eq!(reconcile_error_delay(5, 0.5), Duration::from_secs(11));
        assert_eq!(reconcile_error_delay(30, 0.5), Duration::from_secs(120)); // capped
        assert_eq!(reconcile_error_delay(u32::MAX, 0.5), Duration::from_secs(120));
    }

    #[test]
    fn test_reconcile_error_delay_jitter_bounds() {
        let low = reconcile_error_delay(30, 0.0);
        let high = reconcile_error_delay(30, 0.999_999);
        assert_eq!(low, Duration::from_secs(108)); // -10%
        assert!(high <= Duration::from_secs(132));
        assert!(high > Duration::from_secs(131));
    }

    #[test]
    fn test_error_backoff_per_object_state() {
        let backoff = ErrorBackoff::new();

        backoff.record_failure("default/a");
        backoff.record_failure("default/a");
        backoff.record_failure("default/b");
        assert_eq!(backoff.failure_count("default/a"), 2);
        assert_eq!(backoff.failure_count("default/b"), 1);

        backoff.clear("default/a");
        assert_eq!(backoff.failure_count("default/a"), 0);
        assert_eq!(backoff.failure_count("default/b"), 1);

        let delay = backoff.record_failure("default/c");
        assert!(delay >= Duration::from_millis(4500) && delay <= Duration::from_millis(5500));
    }
}
