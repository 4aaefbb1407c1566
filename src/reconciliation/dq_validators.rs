//! Submission-time data-quality validators.
//!
//! Runs against the affiliate's claimed numbers alone (no platform data
//! needed yet) to flag submissions that look implausible on their face —
//! impossible funnels, ratios far outside normal range, or suspicious
//! jumps versus the affiliate's own prior claim for the same post. Flags
//! feed queue priority via [`crate::reconciliation::trust::priority_for_bucket`].

use crate::reconciliation::classifier::Claim;
use crate::reconciliation::config::DataQualitySettings;
use crate::reconciliation::models::SuspicionFlag;
use std::collections::HashMap;

fn severity_from_excess(excess_ratio: f64) -> &'static str {
    if excess_ratio >= 3.0 {
        "HIGH"
    } else if excess_ratio >= 1.5 {
        "MEDIUM"
    } else {
        "LOW"
    }
}

/// `inf` when there was nothing before and something now (an unbounded
/// jump), `0.0` when there was nothing before and still nothing, otherwise
/// the signed fractional change.
fn growth_pct(old: i64, new: i64) -> f64 {
    if old <= 0 {
        if new > 0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        (new - old) as f64 / old as f64
    }
}

fn flag(key: &str, value: Option<f64>, threshold: Option<f64>, severity: &str, message: String) -> SuspicionFlag {
    SuspicionFlag {
        key: key.to_string(),
        value,
        threshold,
        severity: severity.to_string(),
        message,
        previous: None,
        current: None,
    }
}

fn rule_high_ctr(claim: &Claim, settings: &DataQualitySettings) -> Option<SuspicionFlag> {
    if claim.views < settings.min_views_for_ctr {
        return None;
    }
    let ctr = claim.clicks as f64 / claim.views as f64;
    if ctr <= settings.max_ctr_pct {
        return None;
    }
    let excess = ctr / settings.max_ctr_pct;
    Some(flag(
        "high_ctr",
        Some(ctr),
        Some(settings.max_ctr_pct),
        severity_from_excess(excess),
        format!("click-through rate {:.2}% exceeds expected maximum {:.2}%", ctr * 100.0, settings.max_ctr_pct * 100.0),
    ))
}

fn rule_high_cvr(claim: &Claim, settings: &DataQualitySettings) -> Option<SuspicionFlag> {
    if claim.clicks < settings.min_clicks_for_cvr {
        return None;
    }
    let cvr = claim.conversions as f64 / claim.clicks as f64;
    if cvr <= settings.max_cvr_pct {
        return None;
    }
    let excess = cvr / settings.max_cvr_pct;
    Some(flag(
        "high_cvr",
        Some(cvr),
        Some(settings.max_cvr_pct),
        severity_from_excess(excess),
        format!("conversion rate {:.2}% exceeds expected maximum {:.2}%", cvr * 100.0, settings.max_cvr_pct * 100.0),
    ))
}

fn rule_metric_order(claim: &Claim) -> Option<SuspicionFlag> {
    if claim.clicks > claim.views || claim.conversions > claim.clicks {
        return Some(flag(
            "metric_order_violation",
            None,
            None,
            "HIGH",
            format!(
                "claimed funnel is not monotonic: views={}, clicks={}, conversions={}",
                claim.views, claim.clicks, claim.conversions
            ),
        ));
    }
    None
}

fn rule_evidence_required(claim: &Claim, settings: &DataQualitySettings) -> Option<SuspicionFlag> {
    if claim.views >= settings.evidence_required_views && !claim.has_evidence() {
        return Some(flag(
            "missing_evidence",
            Some(claim.views as f64),
            Some(settings.evidence_required_views as f64),
            "MEDIUM",
            format!(
                "{} claimed views exceed {} but no evidence was provided",
                claim.views, settings.evidence_required_views
            ),
        ));
    }
    None
}

fn rule_non_monotonic(
    metric_name: &str,
    previous: i64,
    current: i64,
    settings: &DataQualitySettings,
) -> Option<SuspicionFlag> {
    let tolerance = (previous as f64 * settings.monotonic_tolerance).max(0.0);
    if (current as f64) < (previous as f64 - tolerance) {
        return Some(SuspicionFlag {
            key: format!("{metric_name}_decrease"),
            value: None,
            threshold: None,
            severity: "HIGH".to_string(),
            message: format!("{metric_name} decreased from {previous} to {current} between submissions"),
            previous: Some(previous),
            current: Some(current),
        });
    }
    None
}

fn rule_spike(metric_name: &str, previous: i64, current: i64, max_growth_pct: f64) -> Option<SuspicionFlag> {
    let growth = growth_pct(previous, current);
    if !growth.is_finite() {
        // unbounded jump from zero is already covered by evidence/order rules
        return None;
    }
    if growth <= max_growth_pct {
        return None;
    }
    Some(SuspicionFlag {
        key: format!("{metric_name}_spike"),
        value: Some(growth),
        threshold: Some(max_growth_pct),
        severity: severity_from_excess((growth + 1.0) / (max_growth_pct + 1.0)),
        message: format!(
            "{metric_name} grew {:.1}% between submissions, above the {:.1}% expected ceiling",
            growth * 100.0,
            max_growth_pct * 100.0
        ),
        previous: Some(previous),
        current: Some(current),
    })
}

/// Runs every rule against `claim`, optionally comparing to `previous` (the
/// affiliate's prior submission for the same post, if any). Returns flags
/// keyed by rule name, ready to attach to `AffiliateReport::suspicion_flags`.
pub fn evaluate_submission(
    claim: &Claim,
    previous: Option<&Claim>,
    settings: &DataQualitySettings,
) -> HashMap<String, SuspicionFlag> {
    let mut flags = HashMap::new();

    for f in [
        rule_high_ctr(claim, settings),
        rule_high_cvr(claim, settings),
        rule_metric_order(claim),
        rule_evidence_required(claim, settings),
    ]
    .into_iter()
    .flatten()
    {
        flags.insert(f.key.clone(), f);
    }

    if let Some(prev) = previous {
        let metrics: [(&str, i64, i64, f64); 3] = [
            ("views", prev.views, claim.views, settings.max_views_growth_pct),
            ("clicks", prev.clicks, claim.clicks, settings.max_clicks_growth_pct),
            (
                "conversions",
                prev.conversions,
                claim.conversions,
                settings.max_conversions_growth_pct,
            ),
        ];
        for (name, old, new, max_growth) in metrics {
            if let Some(f) = rule_non_monotonic(name, old, new, settings) {
                flags.insert(f.key.clone(), f);
            } else if let Some(f) = rule_spike(name, old, new, max_growth) {
                flags.insert(f.key.clone(), f);
            }
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DataQualitySettings {
        DataQualitySettings::default()
    }

    fn claim(views: i64, clicks: i64, conversions: i64) -> Claim {
        Claim {
            views,
            clicks,
            conversions,
            evidence: None,
        }
    }

    #[test]
    fn clean_submission_has_no_flags() {
        let claim = claim(1000, 50, 5);
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(flags.is_empty());
    }

    #[test]
    fn high_ctr_is_flagged() {
        let claim = claim(1000, 900, 5);
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(flags.contains_key("high_ctr"));
        assert_eq!(flags["high_ctr"].severity, "HIGH");
    }

    #[test]
    fn metric_order_violation_is_flagged() {
        let claim = claim(100, 200, 5);
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(flags.contains_key("metric_order_violation"));
    }

    #[test]
    fn missing_evidence_is_flagged_above_views_threshold() {
        let claim = claim(100_000, 5_000, 500);
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(flags.contains_key("missing_evidence"));
    }

    #[test]
    fn evidence_payload_suppresses_the_flag_even_with_zero_clicks() {
        // High views with zero clicks alone must not drive this rule — only
        // the absence of an evidence payload does.
        let mut claim = claim(100_000, 0, 0);
        claim.evidence = Some(serde_json::json!({"screenshot_url": "https://example.com/proof.png"}));
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(!flags.contains_key("missing_evidence"));
    }

    #[test]
    fn empty_evidence_object_still_counts_as_missing() {
        let mut claim = claim(100_000, 5_000, 500);
        claim.evidence = Some(serde_json::json!({}));
        let flags = evaluate_submission(&claim, None, &settings());
        assert!(flags.contains_key("missing_evidence"));
    }

    #[test]
    fn decrease_between_submissions_is_flagged() {
        let prev = claim(1000, 50, 5);
        let claim = claim(900, 50, 5);
        let flags = evaluate_submission(&claim, Some(&prev), &settings());
        assert!(flags.contains_key("views_decrease"));
    }

    #[test]
    fn spike_between_submissions_is_flagged() {
        let prev = claim(1000, 50, 5);
        let claim = claim(10_000, 50, 5);
        let flags = evaluate_submission(&claim, Some(&prev), &settings());
        assert!(flags.contains_key("views_spike"));
    }

    #[test]
    fn zero_to_positive_growth_does_not_spike_flag() {
        let prev = claim(1000, 0, 0);
        let claim = claim(1000, 10, 1);
        let flags = evaluate_submission(&claim, Some(&prev), &settings());
        assert!(!flags.contains_key("clicks_spike"));
        assert!(!flags.contains_key("conversions_spike"));
    }

    #[test]
    fn decrease_takes_precedence_over_spike_check() {
        // A metric can't be both decreasing and spiking; verify only one fires.
        let prev = claim(1000, 50, 5);
        let claim = claim(500, 50, 5);
        let flags = evaluate_submission(&claim, Some(&prev), &settings());
        assert!(flags.contains_key("views_decrease"));
        assert!(!flags.contains_key("views_spike"));
    }
}
