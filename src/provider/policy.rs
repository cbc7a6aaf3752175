use crate::Error;
use std::time::Duration;

/// What to do after a failed provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry policy for provider calls.
///
/// Deliberately simple: only transient failures retry, with a fixed backoff,
/// and the caller's deadline always wins over the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Decide what to do next after an attempt failed.
    ///
    /// `attempt` is 0-based (first failure => attempt=0).
    pub fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if err.is_transient() && attempt < self.max_retries {
            Decision::Retry {
                delay: self.backoff,
            }
        } else {
            Decision::Fail
        }
    }
}
