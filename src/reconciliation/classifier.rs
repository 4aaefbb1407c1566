//! Pure discrepancy classifier: compares an affiliate's claimed metrics
//! against platform-reported metrics and derives a [`ReconciliationStatus`]
//! plus supporting diagnostics. Takes no lock and performs no I/O.

use crate::reconciliation::config::ReconciliationSettings;
use crate::reconciliation::metrics::{apply_growth_allowance, pct_diff};
use crate::reconciliation::models::{DiscrepancyLevel, PlatformReport, ReconciliationStatus};

/// Claimed figures for one affiliate report, as seen by the classifier.
#[derive(Debug, Clone)]
pub struct Claim {
    pub views: i64,
    pub clicks: i64,
    pub conversions: i64,
    /// Supporting evidence payload attached to the submission, if any.
    /// `None` (or an empty object) means no evidence was provided.
    pub evidence: Option<serde_json::Value>,
}

impl Claim {
    pub fn has_evidence(&self) -> bool {
        match &self.evidence {
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub status: ReconciliationStatus,
    pub discrepancy_level: Option<DiscrepancyLevel>,
    pub views_discrepancy: i64,
    pub clicks_discrepancy: i64,
    pub conversions_discrepancy: i64,
    pub views_diff_pct: Option<f64>,
    pub clicks_diff_pct: Option<f64>,
    pub conversions_diff_pct: Option<f64>,
    pub max_discrepancy_pct: Option<f64>,
    pub confidence_ratio: f64,
    pub missing_fields: Vec<String>,
}

struct MetricOutcome {
    discrepancy: i64,
    diff_pct: Option<f64>,
}

fn classify_metric(
    claimed: i64,
    raw_platform: Option<i64>,
    elapsed_hours: f64,
    settings: &ReconciliationSettings,
) -> MetricOutcome {
    match raw_platform {
        None => MetricOutcome {
            discrepancy: 0,
            diff_pct: None,
        },
        Some(platform_value) => {
            let adjusted = apply_growth_allowance(
                platform_value,
                elapsed_hours,
                settings.growth_per_hour_pct,
                settings.growth_cap_hours,
            );
            MetricOutcome {
                discrepancy: claimed - adjusted,
                diff_pct: Some(pct_diff(claimed, adjusted)),
            }
        }
    }
}

/// Classifies one affiliate report against its (possibly absent, possibly
/// partial) platform report.
///
/// * No platform report at all, or a report with every metric missing,
///   produces [`ReconciliationStatus::MissingPlatformData`].
/// * A report with some but not all metrics present produces
///   [`ReconciliationStatus::IncompletePlatformData`] — the provided
///   metrics are still scored, but the status signals the engine should
///   retry rather than treat the comparison as final.
/// * With all three metrics present, an overclaim (any metric claimed more
///   than `overclaim_threshold_pct` above its growth-adjusted platform
///   value) always wins over the tiered discrepancy classification, even
///   if the average discrepancy looks mild.
pub fn classify(
    claim: Claim,
    platform: Option<&PlatformReport>,
    elapsed_hours: f64,
    settings: &ReconciliationSettings,
) -> ClassificationResult {
    let raw = platform.map(|p| {
        (
            p.raw_data.get("views").copied().flatten(),
            p.raw_data.get("clicks").copied().flatten(),
            p.raw_data.get("conversions").copied().flatten(),
        )
    });

    let (raw_views, raw_clicks, raw_conversions) = raw.unwrap_or((None, None, None));
    let provided = [raw_views, raw_clicks, raw_conversions]
        .iter()
        .filter(|v| v.is_some())
        .count();

    if provided == 0 {
        return ClassificationResult {
            status: ReconciliationStatus::MissingPlatformData,
            discrepancy_level: None,
            views_discrepancy: 0,
            clicks_discrepancy: 0,
            conversions_discrepancy: 0,
            views_diff_pct: None,
            clicks_diff_pct: None,
            conversions_diff_pct: None,
            max_discrepancy_pct: None,
            confidence_ratio: 0.0,
            missing_fields: vec!["views".into(), "clicks".into(), "conversions".into()],
        };
    }

    let views_outcome = classify_metric(claim.views, raw_views, elapsed_hours, settings);
    let clicks_outcome = classify_metric(claim.clicks, raw_clicks, elapsed_hours, settings);
    let conversions_outcome =
        classify_metric(claim.conversions, raw_conversions, elapsed_hours, settings);

    let mut missing_fields = Vec::new();
    if raw_views.is_none() {
        missing_fields.push("views".to_string());
    }
    if raw_clicks.is_none() {
        missing_fields.push("clicks".to_string());
    }
    if raw_conversions.is_none() {
        missing_fields.push("conversions".to_string());
    }

    let confidence_ratio = provided as f64 / 3.0;

    let diffs: Vec<f64> = [
        views_outcome.diff_pct,
        clicks_outcome.diff_pct,
        conversions_outcome.diff_pct,
    ]
    .into_iter()
    .flatten()
    .collect();
    let max_discrepancy_pct = diffs.iter().cloned().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.max(v)))
    });

    if provided < 3 {
        return ClassificationResult {
            status: ReconciliationStatus::IncompletePlatformData,
            discrepancy_level: None,
            views_discrepancy: views_outcome.discrepancy,
            clicks_discrepancy: clicks_outcome.discrepancy,
            conversions_discrepancy: conversions_outcome.discrepancy,
            views_diff_pct: views_outcome.diff_pct,
            clicks_diff_pct: clicks_outcome.diff_pct,
            conversions_diff_pct: conversions_outcome.diff_pct,
            max_discrepancy_pct,
            confidence_ratio,
            missing_fields,
        };
    }

    // All three metrics present: an overclaim on any single metric
    // overrides the tiered classification regardless of the others.
    let overclaiming_diffs: Vec<f64> = [
        (views_outcome.discrepancy, views_outcome.diff_pct),
        (clicks_outcome.discrepancy, clicks_outcome.diff_pct),
        (conversions_outcome.discrepancy, conversions_outcome.diff_pct),
    ]
    .into_iter()
    .filter(|&(discrepancy, _)| discrepancy > 0)
    .filter_map(|(_, diff_pct)| diff_pct)
    .collect();

    let overclaimed = overclaiming_diffs
        .iter()
        .any(|&d| d >= settings.overclaim_threshold_pct);

    let max_pct = max_discrepancy_pct.unwrap_or(0.0);

    let (status, discrepancy_level) = if overclaimed {
        // Critical vs. high is decided only by how far the overclaiming
        // metrics themselves run, not by an underclaimed metric elsewhere.
        let max_overclaim_pct = overclaiming_diffs.iter().cloned().fold(0.0, f64::max);
        let level = if max_overclaim_pct >= settings.overclaim_critical_pct {
            DiscrepancyLevel::Critical
        } else {
            DiscrepancyLevel::High
        };
        (ReconciliationStatus::AffiliateOverclaimed, Some(level))
    } else if max_pct <= settings.base_tolerance_pct {
        (ReconciliationStatus::Matched, None)
    } else if max_pct <= settings.low_max {
        (ReconciliationStatus::DiscrepancyLow, Some(DiscrepancyLevel::Low))
    } else if max_pct <= settings.medium_max {
        (
            ReconciliationStatus::DiscrepancyMedium,
            Some(DiscrepancyLevel::Medium),
        )
    } else {
        (ReconciliationStatus::DiscrepancyHigh, Some(DiscrepancyLevel::High))
    };

    ClassificationResult {
        status,
        discrepancy_level,
        views_discrepancy: views_outcome.discrepancy,
        clicks_discrepancy: clicks_outcome.discrepancy,
        conversions_discrepancy: conversions_outcome.discrepancy,
        views_diff_pct: views_outcome.diff_pct,
        clicks_diff_pct: clicks_outcome.diff_pct,
        conversions_diff_pct: conversions_outcome.diff_pct,
        max_discrepancy_pct,
        confidence_ratio,
        missing_fields,
    }
}
