//! Reconciliation Engine: the orchestrator that ties the fetcher,
//! classifier, trust scoring, alerting and repository together for one
//! affiliate report.

use crate::reconciliation::alerting::{self, AlertContext};
use crate::reconciliation::circuit_breaker::CircuitBreaker;
use crate::reconciliation::classifier::{self, Claim};
use crate::reconciliation::config::EngineConfig;
use crate::reconciliation::errors::{EngineError, RepoError};
use crate::reconciliation::models::{
    DiscrepancyLevel, PlatformReport, ReconciliationLog, ReconciliationStatus, TrustEvent,
};
use crate::reconciliation::platform_fetcher;
use crate::reconciliation::repository::Repository;
use crate::reconciliation::trust;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EngineSummary {
    pub status: ReconciliationStatus,
    pub attempt_count: i64,
    pub scheduled_retry_at: Option<DateTime<Utc>>,
    pub trust_delta: Option<f64>,
    pub new_trust_score: Option<f64>,
    pub discrepancy_level: Option<DiscrepancyLevel>,
    pub max_discrepancy_pct: Option<f64>,
    pub rate_limited: bool,
    pub error_code: Option<String>,
    pub missing_fields: Vec<String>,
}

fn trust_event_for(status: ReconciliationStatus) -> Option<TrustEvent> {
    match status {
        ReconciliationStatus::Matched => Some(TrustEvent::PerfectMatch),
        ReconciliationStatus::DiscrepancyLow => Some(TrustEvent::MinorDiscrepancy),
        ReconciliationStatus::DiscrepancyMedium => Some(TrustEvent::MediumDiscrepancy),
        ReconciliationStatus::DiscrepancyHigh => Some(TrustEvent::HighDiscrepancy),
        ReconciliationStatus::AffiliateOverclaimed => Some(TrustEvent::Overclaim),
        _ => None,
    }
}

fn is_busy(err: &RepoError) -> bool {
    matches!(
        err,
        RepoError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Runs one reconciliation attempt for `affiliate_report_id`: fetches
/// platform metrics, classifies the discrepancy, updates trust score and
/// the reconciliation log, raises an alert if warranted, and decides
/// whether to schedule a retry.
pub fn run_reconciliation(
    repo: &dyn Repository,
    breaker: &CircuitBreaker,
    config: &EngineConfig,
    affiliate_report_id: i64,
) -> Result<EngineSummary, EngineError> {
    let bundle = match repo.load_report_bundle(affiliate_report_id) {
        Ok(b) => b,
        Err(RepoError::NotFound(_)) => return Err(EngineError::ReportNotFound(affiliate_report_id)),
        Err(e) => return Err(e.into()),
    };

    let mut log = repo.ensure_reconciliation_log(affiliate_report_id)?;

    let now = Utc::now();
    let elapsed_hours = (now - bundle.report.submitted_at).num_seconds().max(0) as f64 / 3600.0;

    let outcome = platform_fetcher::fetch(
        breaker,
        &bundle.platform.name,
        &bundle.post.url,
        &config.backoff,
    );

    let mut raw_data: HashMap<String, Option<i64>> = HashMap::new();
    raw_data.insert("views".to_string(), outcome.metrics.and_then(|m| m.views));
    raw_data.insert("clicks".to_string(), outcome.metrics.and_then(|m| m.clicks));
    raw_data.insert(
        "conversions".to_string(),
        outcome.metrics.and_then(|m| m.conversions),
    );
    let any_metric_present = raw_data.values().any(|v| v.is_some());

    let ephemeral_platform_report = PlatformReport {
        id: 0,
        post_id: bundle.post.id,
        platform_id: bundle.platform.id,
        views: raw_data.get("views").copied().flatten().unwrap_or(0),
        clicks: raw_data.get("clicks").copied().flatten().unwrap_or(0),
        conversions: raw_data.get("conversions").copied().flatten().unwrap_or(0),
        raw_data,
        fetched_at: now,
    };

    let claim = Claim {
        views: bundle.report.claimed_views,
        clicks: bundle.report.claimed_clicks,
        conversions: bundle.report.claimed_conversions,
        evidence: None,
    };

    let classification = classifier::classify(
        claim,
        Some(&ephemeral_platform_report),
        elapsed_hours,
        &config.reconciliation,
    );

    if any_metric_present {
        let inserted = repo.insert_platform_report(&ephemeral_platform_report)?;
        log.platform_report_id = Some(inserted.id);
    }

    let mut trust_delta = None;
    let mut new_trust_score = None;
    if let Some(event) = trust_event_for(classification.status) {
        let (new_score, delta) = trust::apply_trust_event(bundle.affiliate.trust_score, event, &config.trust);
        new_trust_score = Some(new_score);
        if delta != 0.0 {
            trust_delta = Some(delta);
        }
        repo.record_trust_update(
            bundle.affiliate.id,
            new_score,
            event == TrustEvent::PerfectMatch,
            now,
        )?;
    }

    log.attempt_count += 1;
    log.last_attempt_at = Some(now);
    log.elapsed_hours = elapsed_hours;
    log.status = classification.status;
    log.discrepancy_level = classification.discrepancy_level;
    log.views_discrepancy = classification.views_discrepancy;
    log.clicks_discrepancy = classification.clicks_discrepancy;
    log.conversions_discrepancy = classification.conversions_discrepancy;
    log.views_diff_pct = classification.views_diff_pct;
    log.clicks_diff_pct = classification.clicks_diff_pct;
    log.conversions_diff_pct = classification.conversions_diff_pct;
    log.max_discrepancy_pct = classification.max_discrepancy_pct;
    log.confidence_ratio = Some(classification.confidence_ratio);
    log.missing_fields = classification.missing_fields.clone();
    log.trust_delta = trust_delta;
    log.error_code = outcome.error_code.clone();
    log.error_message = outcome.error_message.clone();
    log.rate_limited = outcome.rate_limited;

    log.scheduled_retry_at = match log.status {
        ReconciliationStatus::MissingPlatformData => {
            let window_exceeded = elapsed_hours > config.retry.missing_window_hours;
            if log.attempt_count >= config.retry.missing_max_attempts as i64 || window_exceeded {
                None
            } else {
                Some(now + chrono::Duration::minutes(config.retry.missing_initial_delay_minutes * log.attempt_count.max(1)))
            }
        }
        ReconciliationStatus::IncompletePlatformData => {
            if log.attempt_count <= 1 + config.retry.incomplete_max_additional_attempts as i64 {
                Some(now + chrono::Duration::minutes(config.retry.incomplete_delay_minutes))
            } else {
                None
            }
        }
        _ => None,
    };

    if log.status.is_terminal_candidate() && log.scheduled_retry_at.is_none() {
        repo.set_post_reconciled(bundle.post.id, true)?;
    }

    let retry_scheduled = log.scheduled_retry_at.is_some();
    let already_alerted = repo.alert_exists_for_log(log.id)?;
    let since = now - chrono::Duration::milliseconds((config.alerting.repeat_overclaim_window_hours * 3_600_000.0) as i64);
    let prior_high_discrepancy_alerts = repo.prior_high_discrepancy_alert_times(bundle.affiliate.id, since)?;

    if let Some(new_alert) = alerting::maybe_create_alert(
        AlertContext {
            log: &log,
            affiliate_id: bundle.affiliate.id,
            platform_id: bundle.platform.id,
            already_alerted,
            retry_scheduled,
            prior_high_discrepancy_alerts: &prior_high_discrepancy_alerts,
        },
        &config.alerting,
        now,
    ) {
        repo.insert_alert(new_alert, now)?;
    }

    commit_log_with_retry(repo, &log)?;

    info!(
        affiliate_report_id,
        status = log.status.as_wire_str(),
        attempt_count = log.attempt_count,
        "reconciliation attempt complete"
    );

    Ok(EngineSummary {
        status: log.status,
        attempt_count: log.attempt_count,
        scheduled_retry_at: log.scheduled_retry_at,
        trust_delta: log.trust_delta,
        new_trust_score,
        discrepancy_level: log.discrepancy_level,
        max_discrepancy_pct: log.max_discrepancy_pct,
        rate_limited: log.rate_limited,
        error_code: log.error_code.clone(),
        missing_fields: log.missing_fields.clone(),
    })
}

/// The repository here is a single SQLite connection, not a pooled ORM
/// session, so there is no "re-attach and re-merge" step on a busy/locked
/// failure — just retry the one `UPDATE` once.
fn commit_log_with_retry(repo: &dyn Repository, log: &ReconciliationLog) -> Result<(), RepoError> {
    match repo.update_reconciliation_log(log) {
        Ok(()) => Ok(()),
        Err(e) if is_busy(&e) => {
            warn!(log_id = log.id, "retrying reconciliation log commit after busy database");
            thread::sleep(Duration::from_millis(50));
            repo.update_reconciliation_log(log)
        }
        Err(e) => Err(e),
    }
}
