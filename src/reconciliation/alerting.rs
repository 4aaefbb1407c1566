//! Rule-based alert generation, one alert per [`ReconciliationLog`] at most.

use crate::reconciliation::config::AlertingSettings;
use crate::reconciliation::models::{Alert, AlertCategory, AlertSeverity, AlertType, ReconciliationLog, ReconciliationStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An alert not yet persisted: everything [`maybe_create_alert`] can decide
/// on its own, missing only the `id` the repository assigns at insert time.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub reconciliation_log_id: i64,
    pub affiliate_id: i64,
    pub platform_id: i64,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub threshold_breached: HashMap<String, serde_json::Value>,
}

impl NewAlert {
    pub fn into_alert(self, id: i64, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id,
            reconciliation_log_id: self.reconciliation_log_id,
            affiliate_id: self.affiliate_id,
            platform_id: self.platform_id,
            alert_type: self.alert_type,
            title: self.title,
            message: self.message,
            category: self.category,
            severity: self.severity,
            status: crate::reconciliation::models::AlertStatus::Open,
            threshold_breached: self.threshold_breached,
            created_at,
        }
    }
}

/// Context the engine gathers before calling [`maybe_create_alert`].
pub struct AlertContext<'a> {
    pub log: &'a ReconciliationLog,
    pub affiliate_id: i64,
    pub platform_id: i64,
    /// True if this log already has an alert attached — makes the call a no-op.
    pub already_alerted: bool,
    /// True if the engine scheduled another retry for this log (R3 only
    /// fires once no further retry will happen).
    pub retry_scheduled: bool,
    /// Prior `HIGH_DISCREPANCY` alert timestamps for this affiliate, used
    /// to detect a repeat within [`AlertingSettings::repeat_overclaim_window_hours`].
    pub prior_high_discrepancy_alerts: &'a [DateTime<Utc>],
}

fn repeat_high_discrepancy(ctx: &AlertContext, settings: &AlertingSettings, now: DateTime<Utc>) -> bool {
    let window = chrono::Duration::milliseconds((settings.repeat_overclaim_window_hours * 3_600_000.0) as i64);
    ctx.prior_high_discrepancy_alerts
        .iter()
        .any(|&at| now - at <= window)
}

/// R1: `AFFILIATE_OVERCLAIMED` → `FRAUD`, severity `CRITICAL` if the
/// discrepancy level itself is critical, else `HIGH`.
/// R2: `DISCREPANCY_HIGH` → `DATA_QUALITY`, severity escalates to
/// `CRITICAL` if this affiliate already triggered a high-discrepancy
/// alert within the repeat window, else `HIGH`.
/// R3: `MISSING_PLATFORM_DATA` with no further retry scheduled → `SYSTEM_HEALTH`,
/// severity `MEDIUM`.
/// Idempotent: a log that already has an alert never gets a second one.
pub fn maybe_create_alert(
    ctx: AlertContext,
    settings: &AlertingSettings,
    now: DateTime<Utc>,
) -> Option<NewAlert> {
    if ctx.already_alerted {
        return None;
    }

    match ctx.log.status {
        ReconciliationStatus::AffiliateOverclaimed => {
            let severity = match ctx.log.discrepancy_level {
                Some(crate::reconciliation::models::DiscrepancyLevel::Critical) => AlertSeverity::Critical,
                _ => AlertSeverity::High,
            };
            Some(NewAlert {
                reconciliation_log_id: ctx.log.id,
                affiliate_id: ctx.affiliate_id,
                platform_id: ctx.platform_id,
                alert_type: AlertType::HighDiscrepancy,
                title: "Affiliate overclaimed platform metrics".to_string(),
                message: format!(
                    "Reconciliation log {} shows an overclaim of up to {:.1}%",
                    ctx.log.id,
                    ctx.log.max_discrepancy_pct.unwrap_or(0.0) * 100.0
                ),
                category: AlertCategory::Fraud,
                severity,
                threshold_breached: discrepancy_threshold_snapshot(ctx.log),
            })
        }
        ReconciliationStatus::DiscrepancyHigh => {
            let severity = if repeat_high_discrepancy(&ctx, settings, now) {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            Some(NewAlert {
                reconciliation_log_id: ctx.log.id,
                affiliate_id: ctx.affiliate_id,
                platform_id: ctx.platform_id,
                alert_type: AlertType::HighDiscrepancy,
                title: "High discrepancy between claimed and platform metrics".to_string(),
                message: format!(
                    "Reconciliation log {} shows a discrepancy of up to {:.1}%",
                    ctx.log.id,
                    ctx.log.max_discrepancy_pct.unwrap_or(0.0) * 100.0
                ),
                category: AlertCategory::DataQuality,
                severity,
                threshold_breached: discrepancy_threshold_snapshot(ctx.log),
            })
        }
        ReconciliationStatus::MissingPlatformData if !ctx.retry_scheduled => Some(NewAlert {
            reconciliation_log_id: ctx.log.id,
            affiliate_id: ctx.affiliate_id,
            platform_id: ctx.platform_id,
            alert_type: AlertType::MissingData,
            title: "Platform data permanently unavailable".to_string(),
            message: format!(
                "Reconciliation log {} exhausted retries without obtaining platform data",
                ctx.log.id
            ),
            category: AlertCategory::SystemHealth,
            severity: AlertSeverity::Medium,
            threshold_breached: {
                let mut breached = HashMap::new();
                breached.insert("attempts".to_string(), serde_json::json!(ctx.log.attempt_count));
                breached
            },
        }),
        _ => None,
    }
}

/// Snapshot of the discrepancy figures an R1/R2 alert fired on, so the
/// alert row carries its own evidence rather than requiring a join back to
/// the reconciliation log.
fn discrepancy_threshold_snapshot(log: &ReconciliationLog) -> HashMap<String, serde_json::Value> {
    let mut breached = HashMap::new();
    breached.insert(
        "discrepancy_level".to_string(),
        serde_json::json!(log.discrepancy_level.map(|d| d.as_wire_str())),
    );
    breached.insert(
        "max_discrepancy_pct".to_string(),
        serde_json::json!(log.max_discrepancy_pct),
    );
    breached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::models::DiscrepancyLevel;

    fn log_with(status: ReconciliationStatus, discrepancy_level: Option<DiscrepancyLevel>) -> ReconciliationLog {
        ReconciliationLog {
            id: 1,
            affiliate_report_id: 1,
            status,
            discrepancy_level,
            views_discrepancy: 0,
            clicks_discrepancy: 0,
            conversions_discrepancy: 0,
            views_diff_pct: None,
            clicks_diff_pct: None,
            conversions_diff_pct: None,
            max_discrepancy_pct: Some(0.6),
            confidence_ratio: Some(1.0),
            missing_fields: vec![],
            attempt_count: 1,
            last_attempt_at: None,
            scheduled_retry_at: None,
            elapsed_hours: 0.0,
            trust_delta: None,
            error_code: None,
            error_message: None,
            rate_limited: false,
            platform_report_id: None,
        }
    }

    fn settings() -> AlertingSettings {
        AlertingSettings::default()
    }

    #[test]
    fn overclaim_produces_fraud_alert() {
        let log = log_with(ReconciliationStatus::AffiliateOverclaimed, Some(DiscrepancyLevel::Critical));
        let ctx = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[],
        };
        let alert = maybe_create_alert(ctx, &settings(), Utc::now()).unwrap();
        assert_eq!(alert.category, AlertCategory::Fraud);
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn idempotent_when_already_alerted() {
        let log = log_with(ReconciliationStatus::AffiliateOverclaimed, Some(DiscrepancyLevel::High));
        let ctx = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: true,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[],
        };
        assert!(maybe_create_alert(ctx, &settings(), Utc::now()).is_none());
    }

    #[test]
    fn high_discrepancy_escalates_on_repeat() {
        let log = log_with(ReconciliationStatus::DiscrepancyHigh, Some(DiscrepancyLevel::High));
        let now = Utc::now();
        let ctx = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[now - chrono::Duration::hours(1)],
        };
        let alert = maybe_create_alert(ctx, &settings(), now).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn high_discrepancy_outside_window_does_not_escalate() {
        let log = log_with(ReconciliationStatus::DiscrepancyHigh, Some(DiscrepancyLevel::High));
        let now = Utc::now();
        let ctx = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[now - chrono::Duration::hours(48)],
        };
        let alert = maybe_create_alert(ctx, &settings(), now).unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);
    }

    #[test]
    fn missing_data_only_alerts_once_retries_exhausted() {
        let log = log_with(ReconciliationStatus::MissingPlatformData, None);
        let ctx_still_retrying = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: true,
            prior_high_discrepancy_alerts: &[],
        };
        assert!(maybe_create_alert(ctx_still_retrying, &settings(), Utc::now()).is_none());

        let ctx_exhausted = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[],
        };
        let alert = maybe_create_alert(ctx_exhausted, &settings(), Utc::now()).unwrap();
        assert_eq!(alert.category, AlertCategory::SystemHealth);
        assert_eq!(alert.severity, AlertSeverity::Medium);
    }

    #[test]
    fn matched_status_never_alerts() {
        let log = log_with(ReconciliationStatus::Matched, None);
        let ctx = AlertContext {
            log: &log,
            affiliate_id: 1,
            platform_id: 1,
            already_alerted: false,
            retry_scheduled: false,
            prior_high_discrepancy_alerts: &[],
        };
        assert!(maybe_create_alert(ctx, &settings(), Utc::now()).is_none());
    }
}
