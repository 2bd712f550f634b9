//! Retry backoff policy helpers.

use std::time::Duration;

use adsync_types::EtlError;

use crate::config::types::RetryPolicy;

/// Compute the sleep before the next attempt.
///
/// `completed_attempts` is the number of attempts already made (1 after the
/// first failure). Exponential growth with cap; an error-provided
/// `retry_after` overrides the computed delay.
#[must_use]
pub fn compute_backoff(
    policy: &RetryPolicy,
    completed_attempts: u32,
    error: Option<&EtlError>,
) -> Duration {
    if let Some(ms) = error.and_then(|e| e.retry_after_ms) {
        return Duration::from_millis(ms);
    }
    let exponent = completed_attempts.saturating_sub(1);
    let delay = policy.backoff_seconds * policy.backoff_multiplier.powi(exponent as i32);
    Duration::from_secs_f64(delay.min(policy.max_backoff_seconds).max(0.0))
}

/// Whether an error should consume another attempt from the retry budget.
/// Transport-class errors are retryable by their own metadata; auth errors
/// also count against the platform's budget so a flapping token endpoint
/// gets its chances.
#[must_use]
pub fn should_retry(error: &EtlError) -> bool {
    error.retryable || error.category == adsync_types::ErrorCategory::Auth
}
