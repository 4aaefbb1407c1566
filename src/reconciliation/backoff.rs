//! Exponential backoff with jitter for platform fetch retries.

use crate::reconciliation::config::BackoffPolicy;
use rand::Rng;

/// `delay(attempt) = min(base * factor^(attempt-1), max) * uniform(1-jitter, 1+jitter)`.
/// `attempt` below 1 is clamped up to 1.
pub fn compute_backoff_seconds(attempt: u32, policy: &BackoffPolicy) -> f64 {
    let attempt = attempt.max(1);
    let raw = policy.base_seconds as f64 * (policy.factor as f64).powi(attempt as i32 - 1);
    let capped = raw.min(policy.max_seconds as f64);

    if policy.jitter_pct <= 0.0 {
        return capped.max(0.0);
    }
    let jitter_amount = capped * policy.jitter_pct;
    let jittered = rand::thread_rng().gen_range((capped - jitter_amount)..=(capped + jitter_amount));
    jittered.max(0.0)
}
