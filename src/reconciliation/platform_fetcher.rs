//! Platform Fetcher: wraps the adapter registry with circuit-breaking and
//! exponential-backoff retry.

use crate::reconciliation::adapters::{self, FetchedMetrics};
use crate::reconciliation::backoff::compute_backoff_seconds;
use crate::reconciliation::circuit_breaker::CircuitBreaker;
use crate::reconciliation::config::BackoffPolicy;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub success: bool,
    pub metrics: Option<FetchedMetrics>,
    pub partial_missing: Vec<String>,
    pub attempts: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub rate_limited: bool,
}

fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") {
        "rate_limited"
    } else if lower.contains("auth") || lower.contains("401") || lower.contains("403") {
        "auth_error"
    } else {
        "fetch_error"
    }
}

const ALL_METRICS: [&str; 3] = ["views", "clicks", "conversions"];

/// Fetches one post's metrics from `platform_name`, gated by the shared
/// circuit breaker and retried with backoff up to `policy.max_attempts`.
pub fn fetch(
    breaker: &CircuitBreaker,
    platform_name: &str,
    post_url: &str,
    policy: &BackoffPolicy,
) -> FetchOutcome {
    let (allowed, deny_reason) = breaker.allow_call(platform_name);
    if !allowed {
        let reason = deny_reason.expect("denied calls always carry a reason");
        return FetchOutcome {
            success: false,
            metrics: None,
            partial_missing: ALL_METRICS.iter().map(|s| s.to_string()).collect(),
            attempts: 0,
            error_code: Some(reason.as_error_code().to_string()),
            error_message: None,
            rate_limited: false,
        };
    }

    let adapter = match adapters::lookup(platform_name) {
        Ok(a) => a,
        Err(_) => {
            return FetchOutcome {
                success: false,
                metrics: None,
                partial_missing: ALL_METRICS.iter().map(|s| s.to_string()).collect(),
                attempts: 1,
                error_code: Some("adapter_missing".to_string()),
                error_message: Some(format!("no adapter registered for {platform_name}")),
                rate_limited: false,
            };
        }
    };

    let mut last_error_code = "fetch_error".to_string();
    let mut last_error_message: Option<String> = None;
    let mut rate_limited = false;

    for attempt in 1..=policy.max_attempts {
        match adapter.fetch(post_url) {
            Ok(metrics) => {
                breaker.record_success(platform_name);
                let mut partial_missing = Vec::new();
                if metrics.views.is_none() {
                    partial_missing.push("views".to_string());
                }
                if metrics.clicks.is_none() {
                    partial_missing.push("clicks".to_string());
                }
                if metrics.conversions.is_none() {
                    partial_missing.push("conversions".to_string());
                }
                return FetchOutcome {
                    success: true,
                    metrics: Some(metrics),
                    partial_missing,
                    attempts: attempt,
                    error_code: None,
                    error_message: None,
                    rate_limited: false,
                };
            }
            Err(err) => {
                let message = err.to_string();
                let code = classify_error(&message);
                breaker.record_failure(platform_name);
                last_error_code = code.to_string();
                last_error_message = Some(message.clone());

                if code == "auth_error" {
                    warn!(platform = platform_name, "auth error fetching metrics, not retrying");
                    break;
                }
                rate_limited = rate_limited || code == "rate_limited";

                if attempt < policy.max_attempts {
                    let delay = compute_backoff_seconds(attempt, policy);
                    debug!(platform = platform_name, attempt, delay, "retrying platform fetch");
                    thread::sleep(Duration::from_secs_f64(delay));
                }
            }
        }
    }

    FetchOutcome {
        success: false,
        metrics: None,
        partial_missing: ALL_METRICS.iter().map(|s| s.to_string()).collect(),
        attempts: policy.max_attempts,
        error_code: Some(last_error_code),
        error_message: last_error_message,
        rate_limited,
    }
}
