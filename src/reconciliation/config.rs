//! Tunables for the reconciliation core.
//!
//! The library never reads the environment or disk itself — `EngineConfig`
//! is a plain, `Default`-able struct tree a caller constructs and injects.
//! The CLI layer (`src/bin/reconcile.rs`) is the one place allowed to look
//! at `std::env` or a TOML file and fold the result over `EngineConfig::default()`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    #[serde(default)]
    pub trust: TrustScoringSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub alerting: AlertingSettings,
    #[serde(default)]
    pub data_quality: DataQualitySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconciliation: ReconciliationSettings::default(),
            trust: TrustScoringSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            backoff: BackoffPolicy::default(),
            retry: RetryPolicy::default(),
            queue: QueueSettings::default(),
            alerting: AlertingSettings::default(),
            data_quality: DataQualitySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    pub base_tolerance_pct: f64,
    pub low_max: f64,
    pub medium_max: f64,
    pub overclaim_threshold_pct: f64,
    pub overclaim_critical_pct: f64,
    pub growth_per_hour_pct: f64,
    pub growth_cap_hours: i64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            base_tolerance_pct: 0.05,
            low_max: 0.10,
            medium_max: 0.20,
            overclaim_threshold_pct: 0.20,
            overclaim_critical_pct: 0.50,
            growth_per_hour_pct: 0.10,
            growth_cap_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScoringSettings {
    pub min_score: f64,
    pub max_score: f64,
    pub initial_score: f64,
    pub events: HashMap<String, f64>,
    pub reduced_frequency_threshold: f64,
    pub increased_monitoring_threshold: f64,
    pub manual_review_threshold: f64,
}

impl Default for TrustScoringSettings {
    fn default() -> Self {
        let mut events = HashMap::new();
        events.insert("perfect_match".to_string(), 0.01);
        events.insert("minor_discrepancy".to_string(), -0.01);
        events.insert("medium_discrepancy".to_string(), -0.03);
        events.insert("high_discrepancy".to_string(), -0.05);
        events.insert("overclaim".to_string(), -0.10);
        events.insert("impossible_submission".to_string(), -0.15);
        events.insert("manual_adjust".to_string(), 0.0);
        Self {
            min_score: 0.0,
            max_score: 1.0,
            initial_score: 0.50,
            events,
            reduced_frequency_threshold: 0.75,
            increased_monitoring_threshold: 0.50,
            manual_review_threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub open_cooldown_seconds: i64,
    pub half_open_probe_count: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown_seconds: 300,
            half_open_probe_count: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_seconds: u64,
    pub factor: u32,
    pub max_seconds: u64,
    pub jitter_pct: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_seconds: 1,
            factor: 2,
            max_seconds: 60,
            jitter_pct: 0.10,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub missing_initial_delay_minutes: i64,
    pub missing_max_attempts: u32,
    pub missing_window_hours: f64,
    pub incomplete_max_additional_attempts: u32,
    pub incomplete_delay_minutes: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            missing_initial_delay_minutes: 30,
            missing_max_attempts: 5,
            missing_window_hours: 24.0,
            incomplete_max_additional_attempts: 1,
            incomplete_delay_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub priorities: HashMap<String, i64>,
    pub warn_depth: usize,
    pub max_in_memory: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let mut priorities = HashMap::new();
        priorities.insert("high".to_string(), 0);
        priorities.insert("normal".to_string(), 5);
        priorities.insert("low".to_string(), 10);
        Self {
            priorities,
            warn_depth: 1000,
            max_in_memory: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertingSettings {
    pub repeat_overclaim_window_hours: f64,
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            repeat_overclaim_window_hours: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataQualitySettings {
    pub max_ctr_pct: f64,
    pub max_cvr_pct: f64,
    pub min_views_for_ctr: i64,
    pub min_clicks_for_cvr: i64,
    pub evidence_required_views: i64,
    pub monotonic_tolerance: f64,
    pub max_views_growth_pct: f64,
    pub max_clicks_growth_pct: f64,
    pub max_conversions_growth_pct: f64,
}

impl Default for DataQualitySettings {
    fn default() -> Self {
        Self {
            max_ctr_pct: 0.35,
            max_cvr_pct: 0.60,
            min_views_for_ctr: 100,
            min_clicks_for_cvr: 20,
            evidence_required_views: 50_000,
            monotonic_tolerance: 0.01,
            max_views_growth_pct: 5.0,
            max_clicks_growth_pct: 5.0,
            max_conversions_growth_pct: 5.0,
        }
    }
}
