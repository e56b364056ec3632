//! # Retry Backoff
//!
//! Exponential backoff policy for waiting on dependencies that have not yet
//! appeared in the source store.
//!
//! A policy is `steps` attempts with a wait between consecutive attempts that
//! starts at `duration` and grows by `factor`, with a multiplicative jitter
//! fraction so concurrent populate runs don't hammer a backend in lockstep.
//! Parameters are always injected — tests use [`RetryPolicy::no_wait`] or a
//! zero base duration to run the full attempt loop without sleeping.
//!
//! ## Usage
//!
//! ```rust
//! use secret_populator::backoff::RetryPolicy;
//!
//! let policy = RetryPolicy { steps: 4, duration: std::time::Duration::from_millis(100), factor: 2.0, jitter: 0.0 };
//! let delays: Vec<_> = policy.delays().collect();
//! assert_eq!(delays.len(), 3); // waits *between* 4 attempts
//! assert_eq!(delays[0], std::time::Duration::from_millis(100));
//! assert_eq!(delays[2], std::time::Duration::from_millis(400));
//! ```

use rand::Rng;
use std::time::Duration;

/// Retry policy governing how long a single definition waits for a missing
/// dependency before it is given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of resolve attempts (not number of waits)
    pub steps: u32,
    /// Base wait before the second attempt
    pub duration: Duration,
    /// Multiplicative growth per step
    pub factor: f64,
    /// Jitter fraction in `[0, 1]`; each wait is scaled by `1 + rand(0, jitter)`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { steps: 5, duration: Duration::from_secs(2), factor: 2.0, jitter: 0.1 }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting. Used for fully-synchronous environments.
    #[must_use]
    pub fn no_wait() -> Self {
        Self { steps: 1, duration: Duration::ZERO, factor: 1.0, jitter: 0.0 }
    }

    /// Iterator over the waits between attempts: `steps - 1` durations,
    /// jittered independently per wait.
    pub fn delays(&self) -> Delays {
        Delays { policy: self.clone(), current: self.duration, remaining: self.steps.saturating_sub(1) }
    }
}

/// Iterator over backoff waits. Advances the exponential sequence each call.
#[derive(Debug)]
pub struct Delays {
    policy: RetryPolicy,
    current: Duration,
    remaining: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.current;
        self.current = self.current.mul_f64(self.policy.factor.max(1.0));

        if self.policy.jitter > 0.0 && base > Duration::ZERO {
            let scale = 1.0 + rand::thread_rng().gen_range(0.0..self.policy.jitter);
            Some(base.mul_f64(scale))
        } else {
            Some(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_grows_by_factor() {
        let policy = RetryPolicy {
            steps: 5,
            duration: Duration::from_millis(2),
            factor: 2.0,
            jitter: 0.0,
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(8),
                Duration::from_millis(16),
            ]
        );
    }

    #[test]
    fn test_steps_bound_number_of_waits() {
        let policy = RetryPolicy { steps: 1, ..RetryPolicy::default() };
        assert_eq!(policy.delays().count(), 0);

        let policy = RetryPolicy { steps: 0, ..RetryPolicy::default() };
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let policy = RetryPolicy {
            steps: 50,
            duration: Duration::from_millis(100),
            factor: 1.0,
            jitter: 0.1,
        };
        for delay in policy.delays() {
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(110));
        }
    }

    #[test]
    fn test_no_wait_policy() {
        let policy = RetryPolicy::no_wait();
        assert_eq!(policy.steps, 1);
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn test_zero_duration_policy_yields_zero_waits() {
        // Tests run the full attempt loop without sleeping.
        let policy = RetryPolicy {
            steps: 3,
            duration: Duration::ZERO,
            factor: 2.0,
            jitter: 0.1,
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays, vec![Duration::ZERO, Duration::ZERO]);
    }
}
