//! Retry Policy Engine.

use crate::timer::{RetryPolicy, RetryStrategy};

/// Computes the delay before attempt `attempt` (1-based) given `policy`.
pub fn next_delay_ms(policy: &RetryPolicy, attempt: i64) -> i64 {
    match policy.strategy {
        RetryStrategy::Fixed => policy.backoff_ms,
        RetryStrategy::Linear => policy.backoff_ms * attempt,
        RetryStrategy::Exponential => policy.backoff_ms * 2i64.pow((attempt - 1).max(0) as u32),
    }
}

/// `maxAttempts = 0` disables retries entirely.
pub fn retries_exhausted(policy: &RetryPolicy, attempt_just_made: i64) -> bool {
    attempt_just_made >= policy.max_attempts
}
