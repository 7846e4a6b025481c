//! Per-resource retry policy.

use std::time::Duration;

/// Retries after the first attempt, so four attempts in total.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Upper bound on the delay between two attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// How often, and how patiently, a failed fetch is retried.
///
/// The first retry waits `backoff`, each further retry doubles the wait, and
/// no wait exceeds `max_backoff`. A zero `backoff` retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES, backoff: Duration::ZERO, max_backoff: DEFAULT_MAX_BACKOFF }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Total number of attempts a resource may get.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.backoff.checked_mul(factor).unwrap_or(self.max_backoff).min(self.max_backoff)
    }

    pub fn start(&self) -> Attempt {
        Attempt::Pending { number: 1, retries_left: self.max_retries }
    }
}

/// Where a single resource is in its retry lifecycle.
///
/// `Pending` → (success, handled by the caller) or `Pending` with one fewer
/// retry → ... → `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Attempt `number` (1-based) is due, with `retries_left` after it.
    Pending { number: u32, retries_left: u32 },
    /// No attempts left; `attempts` were made.
    Exhausted { attempts: u32 },
}

impl Attempt {
    /// Advance past a failed attempt.
    #[must_use]
    pub fn failed(self) -> Self {
        match self {
            Self::Pending { number, retries_left: 0 } => Self::Exhausted { attempts: number },
            Self::Pending { number, retries_left } => {
                Self::Pending { number: number + 1, retries_left: retries_left - 1 }
            },
            exhausted @ Self::Exhausted { .. } => exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_policy_allows_four_attempts() {
        let policy = RetryPolicy::default();
        let mut attempt = policy.start();
        let mut made = 0;
        while let Attempt::Pending { number, .. } = attempt {
            made += 1;
            assert_eq!(number, made);
            attempt = attempt.failed();
        }
        assert_eq!(made, policy.max_attempts());
        assert_eq!(attempt, Attempt::Exhausted { attempts: 4 });
    }

    #[test]
    fn test_no_retries() {
        let attempt = RetryPolicy::none().start().failed();
        assert_eq!(attempt, Attempt::Exhausted { attempts: 1 });
        assert_eq!(attempt.failed(), attempt);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    #[case(4, 800)]
    #[case(5, 1000)]
    #[case(64, 1000)]
    fn test_backoff_doubles_up_to_cap(#[case] retry: u32, #[case] millis: u64) {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(retry), Duration::from_millis(millis));
    }

    #[test]
    fn test_zero_backoff_is_immediate() {
        assert_eq!(RetryPolicy::default().delay_for(3), Duration::ZERO);
    }
}
