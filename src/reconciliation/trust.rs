//! Bounded additive trust-score state machine and queue-priority derivation.

use crate::reconciliation::config::TrustScoringSettings;
use crate::reconciliation::models::TrustEvent;

/// Qualitative trust bucket, derived from the numeric score, used to pick a
/// base queue priority for re-fetch jobs belonging to this affiliate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustBucket {
    HighTrust,
    Normal,
    LowTrust,
    Critical,
}

/// Applies `event` to `current`, clamping to `[min_score, max_score]`.
/// Returns `(new_score, effective_delta)`, where `effective_delta` is the
/// delta actually applied after clamping (may differ from the configured
/// delta near the bounds).
pub fn apply_trust_event(current: f64, event: TrustEvent, settings: &TrustScoringSettings) -> (f64, f64) {
    let delta = settings
        .events
        .get(event.config_key())
        .copied()
        .unwrap_or(0.0);
    let new_score = (current + delta).clamp(settings.min_score, settings.max_score);
    (new_score, new_score - current)
}

pub fn bucket_for_score(score: f64, settings: &TrustScoringSettings) -> TrustBucket {
    if score >= settings.reduced_frequency_threshold {
        TrustBucket::HighTrust
    } else if score >= settings.increased_monitoring_threshold {
        TrustBucket::Normal
    } else if score >= settings.manual_review_threshold {
        TrustBucket::LowTrust
    } else {
        TrustBucket::Critical
    }
}

/// Derives the queue priority label from a trust bucket and whether the
/// submission carries any data-quality suspicion flags.
pub fn priority_for_bucket(bucket: TrustBucket, has_suspicion_flags: bool) -> &'static str {
    let base = match bucket {
        TrustBucket::Critical | TrustBucket::LowTrust => "high",
        TrustBucket::Normal => "normal",
        TrustBucket::HighTrust => "low",
    };
    if has_suspicion_flags && base != "high" {
        "high"
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::config::EngineConfig;

    #[test]
    fn clamp_at_upper_bound() {
        let cfg = EngineConfig::default();
        let (new, delta) = apply_trust_event(0.99, TrustEvent::PerfectMatch, &cfg.trust);
        assert!((new - 1.00).abs() < 1e-9);
        assert!((delta - 0.01).abs() < 1e-9);
    }

    #[test]
    fn clamp_at_lower_bound() {
        let cfg = EngineConfig::default();
        let (new, delta) = apply_trust_event(0.005, TrustEvent::ImpossibleSubmission, &cfg.trust);
        assert!((new - 0.0).abs() < 1e-9);
        assert!((delta - (-0.005)).abs() < 1e-9);
    }

    #[test]
    fn unclamped_delta_matches_config() {
        let cfg = EngineConfig::default();
        let (new, delta) = apply_trust_event(0.5, TrustEvent::MediumDiscrepancy, &cfg.trust);
        assert!((new - 0.47).abs() < 1e-9);
        assert!((delta - (-0.03)).abs() < 1e-9);
    }

    #[test]
    fn bucket_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(bucket_for_score(0.90, &cfg.trust), TrustBucket::HighTrust);
        assert_eq!(bucket_for_score(0.60, &cfg.trust), TrustBucket::Normal);
        assert_eq!(bucket_for_score(0.30, &cfg.trust), TrustBucket::LowTrust);
        assert_eq!(bucket_for_score(0.10, &cfg.trust), TrustBucket::Critical);
    }

    #[test]
    fn priority_derivation_escalates_on_suspicion() {
        assert_eq!(priority_for_bucket(TrustBucket::HighTrust, false), "low");
        assert_eq!(priority_for_bucket(TrustBucket::HighTrust, true), "high");
        assert_eq!(priority_for_bucket(TrustBucket::Normal, false), "normal");
        assert_eq!(priority_for_bucket(TrustBucket::Critical, true), "high");
        assert_eq!(priority_for_bucket(TrustBucket::LowTrust, false), "high");
    }
}
