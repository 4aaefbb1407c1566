//! SQLite-backed persistence for the reconciliation core.
//!
//! One shared [`rusqlite::Connection`] behind a `parking_lot::Mutex`, not a
//! connection opened per call: SQLite serializes writers anyway, and a
//! single connection lets `ensure_reconciliation_log`'s insert-then-reload
//! race stay inside one transaction (see SPEC_FULL.md §11).

use crate::reconciliation::alerting::NewAlert;
use crate::reconciliation::classifier::Claim;
use crate::reconciliation::errors::RepoError;
use crate::reconciliation::models::{
    Affiliate, Alert, Platform, PlatformReport, Post, ReconciliationLog,
    ReconciliationStatus, ReportBundle, SubmissionMethod, SuspicionFlag,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// Everything the engine and workers need from storage. Kept as a trait so
/// tests can swap in an in-memory fake without touching SQLite.
pub trait Repository: Send + Sync {
    fn load_report_bundle(&self, affiliate_report_id: i64) -> Result<ReportBundle, RepoError>;
    fn ensure_reconciliation_log(&self, affiliate_report_id: i64) -> Result<ReconciliationLog, RepoError>;
    fn update_reconciliation_log(&self, log: &ReconciliationLog) -> Result<(), RepoError>;
    fn insert_platform_report(&self, report: &PlatformReport) -> Result<PlatformReport, RepoError>;
    fn previous_claim(&self, post_id: i64, excluding_report_id: i64) -> Result<Option<Claim>, RepoError>;
    /// Writes the affiliate's new trust score and, when `increment_accurate`
    /// is set (a `PERFECT_MATCH` trust event), bumps `accurate_submissions`.
    fn record_trust_update(
        &self,
        affiliate_id: i64,
        new_score: f64,
        increment_accurate: bool,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError>;
    fn set_post_reconciled(&self, post_id: i64, reconciled: bool) -> Result<(), RepoError>;
    fn insert_alert(&self, alert: NewAlert, at: DateTime<Utc>) -> Result<Alert, RepoError>;
    fn alert_exists_for_log(&self, reconciliation_log_id: i64) -> Result<bool, RepoError>;
    fn prior_high_discrepancy_alert_times(&self, affiliate_id: i64, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, RepoError>;
    /// Inserts a new affiliate report and bumps the affiliate's
    /// `total_submissions`. Used by the submission→queue boundary (§4.13).
    fn create_affiliate_report(
        &self,
        post_id: i64,
        affiliate_id: i64,
        claim: Claim,
        suspicion_flags: HashMap<String, SuspicionFlag>,
        submitted_at: DateTime<Utc>,
        method: SubmissionMethod,
    ) -> Result<i64, RepoError>;
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &str) -> Result<Self, RepoError> {
        let conn = Connection::open(path)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS affiliates (
                id INTEGER PRIMARY KEY,
                trust_score REAL NOT NULL,
                total_submissions INTEGER NOT NULL DEFAULT 0,
                accurate_submissions INTEGER NOT NULL DEFAULT 0,
                last_trust_update TEXT
            );
            CREATE TABLE IF NOT EXISTS platforms (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                campaign_id INTEGER NOT NULL,
                affiliate_id INTEGER NOT NULL,
                platform_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                is_reconciled INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS affiliate_reports (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL,
                claimed_views INTEGER NOT NULL,
                claimed_clicks INTEGER NOT NULL,
                claimed_conversions INTEGER NOT NULL,
                submitted_at TEXT NOT NULL,
                suspicion_flags TEXT NOT NULL DEFAULT '{}',
                submission_method TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS platform_reports (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL,
                platform_id INTEGER NOT NULL,
                views INTEGER NOT NULL,
                clicks INTEGER NOT NULL,
                conversions INTEGER NOT NULL,
                raw_data TEXT NOT NULL DEFAULT '{}',
                fetched_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reconciliation_logs (
                id INTEGER PRIMARY KEY,
                affiliate_report_id INTEGER NOT NULL UNIQUE,
                status TEXT NOT NULL,
                discrepancy_level TEXT,
                views_discrepancy INTEGER NOT NULL DEFAULT 0,
                clicks_discrepancy INTEGER NOT NULL DEFAULT 0,
                conversions_discrepancy INTEGER NOT NULL DEFAULT 0,
                views_diff_pct REAL,
                clicks_diff_pct REAL,
                conversions_diff_pct REAL,
                max_discrepancy_pct REAL,
                confidence_ratio REAL,
                missing_fields TEXT NOT NULL DEFAULT '[]',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                scheduled_retry_at TEXT,
                elapsed_hours REAL NOT NULL DEFAULT 0,
                trust_delta REAL,
                error_code TEXT,
                error_message TEXT,
                rate_limited INTEGER NOT NULL DEFAULT 0,
                platform_report_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY,
                reconciliation_log_id INTEGER NOT NULL,
                affiliate_id INTEGER NOT NULL,
                platform_id INTEGER NOT NULL,
                alert_type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                threshold_breached TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<ReconciliationLog> {
        let status_str: String = row.get("status")?;
        let discrepancy_level_str: Option<String> = row.get("discrepancy_level")?;
        let missing_fields_json: String = row.get("missing_fields")?;
        Ok(ReconciliationLog {
            id: row.get("id")?,
            affiliate_report_id: row.get("affiliate_report_id")?,
            status: ReconciliationStatus::from_wire_str(&status_str)
                .unwrap_or(ReconciliationStatus::MissingPlatformData),
            discrepancy_level: discrepancy_level_str.and_then(|s| match s.as_str() {
                "LOW" => Some(crate::reconciliation::models::DiscrepancyLevel::Low),
                "MEDIUM" => Some(crate::reconciliation::models::DiscrepancyLevel::Medium),
                "HIGH" => Some(crate::reconciliation::models::DiscrepancyLevel::High),
                "CRITICAL" => Some(crate::reconciliation::models::DiscrepancyLevel::Critical),
                _ => None,
            }),
            views_discrepancy: row.get("views_discrepancy")?,
            clicks_discrepancy: row.get("clicks_discrepancy")?,
            conversions_discrepancy: row.get("conversions_discrepancy")?,
            views_diff_pct: row.get("views_diff_pct")?,
            clicks_diff_pct: row.get("clicks_diff_pct")?,
            conversions_diff_pct: row.get("conversions_diff_pct")?,
            max_discrepancy_pct: row.get("max_discrepancy_pct")?,
            confidence_ratio: row.get("confidence_ratio")?,
            missing_fields: serde_json::from_str(&missing_fields_json).unwrap_or_default(),
            attempt_count: row.get("attempt_count")?,
            last_attempt_at: row.get("last_attempt_at")?,
            scheduled_retry_at: row.get("scheduled_retry_at")?,
            elapsed_hours: row.get("elapsed_hours")?,
            trust_delta: row.get("trust_delta")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            rate_limited: row.get::<_, i64>("rate_limited")? != 0,
            platform_report_id: row.get("platform_report_id")?,
        })
    }
}

impl Repository for SqliteRepository {
    fn load_report_bundle(&self, affiliate_report_id: i64) -> Result<ReportBundle, RepoError> {
        let conn = self.conn.lock();

        let report_row = conn.query_row(
            "SELECT id, post_id, claimed_views, claimed_clicks, claimed_conversions,
                    submitted_at, suspicion_flags, submission_method
             FROM affiliate_reports WHERE id = ?1",
            params![affiliate_report_id],
            |row| {
                let flags_json: String = row.get(6)?;
                let method_str: String = row.get(7)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                    flags_json,
                    method_str,
                ))
            },
        );

        let (id, post_id, views, clicks, conversions, submitted_at, flags_json, method_str) =
            report_row.optional()?.ok_or_else(|| {
                RepoError::NotFound(format!("affiliate_report {affiliate_report_id}"))
            })?;

        let suspicion_flags: HashMap<String, SuspicionFlag> =
            serde_json::from_str(&flags_json).unwrap_or_default();
        let submission_method = if method_str == "DISCORD" {
            SubmissionMethod::Discord
        } else {
            SubmissionMethod::Api
        };

        let report = crate::reconciliation::models::AffiliateReport {
            id,
            post_id,
            claimed_views: views,
            claimed_clicks: clicks,
            claimed_conversions: conversions,
            submitted_at,
            suspicion_flags,
            submission_method,
        };

        let post = conn
            .query_row(
                "SELECT id, campaign_id, affiliate_id, platform_id, url, is_reconciled
                 FROM posts WHERE id = ?1",
                params![post_id],
                |row| {
                    Ok(Post {
                        id: row.get(0)?,
                        campaign_id: row.get(1)?,
                        affiliate_id: row.get(2)?,
                        platform_id: row.get(3)?,
                        url: row.get(4)?,
                        is_reconciled: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| RepoError::NotFound(format!("post {post_id}")))?;

        let platform = conn
            .query_row(
                "SELECT id, name, is_active FROM platforms WHERE id = ?1",
                params![post.platform_id],
                |row| {
                    Ok(Platform {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_active: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| RepoError::NotFound(format!("platform {}", post.platform_id)))?;

        let affiliate = conn
            .query_row(
                "SELECT id, trust_score, total_submissions, accurate_submissions, last_trust_update
                 FROM affiliates WHERE id = ?1",
                params![post.affiliate_id],
                |row| {
                    Ok(Affiliate {
                        id: row.get(0)?,
                        trust_score: row.get(1)?,
                        total_submissions: row.get(2)?,
                        accurate_submissions: row.get(3)?,
                        last_trust_update: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| RepoError::NotFound(format!("affiliate {}", post.affiliate_id)))?;

        let existing_log = conn
            .query_row(
                "SELECT * FROM reconciliation_logs WHERE affiliate_report_id = ?1",
                params![affiliate_report_id],
                Self::row_to_log,
            )
            .optional()?;

        Ok(ReportBundle {
            report,
            post,
            platform,
            affiliate,
            existing_log,
        })
    }

    fn ensure_reconciliation_log(&self, affiliate_report_id: i64) -> Result<ReconciliationLog, RepoError> {
        let conn = self.conn.lock();
        let insert = conn.execute(
            "INSERT OR IGNORE INTO reconciliation_logs
                (affiliate_report_id, status, missing_fields, attempt_count, elapsed_hours, rate_limited)
             VALUES (?1, 'MISSING_PLATFORM_DATA', '[]', 0, 0, 0)",
            params![affiliate_report_id],
        );
        insert?;
        conn.query_row(
            "SELECT * FROM reconciliation_logs WHERE affiliate_report_id = ?1",
            params![affiliate_report_id],
            Self::row_to_log,
        )
        .map_err(RepoError::from)
    }

    fn update_reconciliation_log(&self, log: &ReconciliationLog) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        let missing_fields_json = serde_json::to_string(&log.missing_fields)?;
        conn.execute(
            "UPDATE reconciliation_logs SET
                status = ?1, discrepancy_level = ?2,
                views_discrepancy = ?3, clicks_discrepancy = ?4, conversions_discrepancy = ?5,
                views_diff_pct = ?6, clicks_diff_pct = ?7, conversions_diff_pct = ?8,
                max_discrepancy_pct = ?9, confidence_ratio = ?10, missing_fields = ?11,
                attempt_count = ?12, last_attempt_at = ?13, scheduled_retry_at = ?14,
                elapsed_hours = ?15, trust_delta = ?16, error_code = ?17, error_message = ?18,
                rate_limited = ?19, platform_report_id = ?20
             WHERE id = ?21",
            params![
                log.status.as_wire_str(),
                log.discrepancy_level.map(|d| d.as_wire_str()),
                log.views_discrepancy,
                log.clicks_discrepancy,
                log.conversions_discrepancy,
                log.views_diff_pct,
                log.clicks_diff_pct,
                log.conversions_diff_pct,
                log.max_discrepancy_pct,
                log.confidence_ratio,
                missing_fields_json,
                log.attempt_count,
                log.last_attempt_at,
                log.scheduled_retry_at,
                log.elapsed_hours,
                log.trust_delta,
                log.error_code,
                log.error_message,
                log.rate_limited as i64,
                log.platform_report_id,
                log.id,
            ],
        )?;
        Ok(())
    }

    fn insert_platform_report(&self, report: &PlatformReport) -> Result<PlatformReport, RepoError> {
        let conn = self.conn.lock();
        let raw_data_json = serde_json::to_string(&report.raw_data)?;
        conn.execute(
            "INSERT INTO platform_reports (post_id, platform_id, views, clicks, conversions, raw_data, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.post_id,
                report.platform_id,
                report.views,
                report.clicks,
                report.conversions,
                raw_data_json,
                report.fetched_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PlatformReport {
            id,
            ..report.clone()
        })
    }

    fn previous_claim(&self, post_id: i64, excluding_report_id: i64) -> Result<Option<Claim>, RepoError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT claimed_views, claimed_clicks, claimed_conversions FROM affiliate_reports
             WHERE post_id = ?1 AND id != ?2 ORDER BY submitted_at DESC LIMIT 1",
            params![post_id, excluding_report_id],
            |row| {
                Ok(Claim {
                    views: row.get(0)?,
                    clicks: row.get(1)?,
                    conversions: row.get(2)?,
                    evidence: None,
                })
            },
        )
        .optional()
        .map_err(RepoError::from)
    }

    fn record_trust_update(
        &self,
        affiliate_id: i64,
        new_score: f64,
        increment_accurate: bool,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE affiliates SET
                trust_score = ?1,
                last_trust_update = ?2,
                accurate_submissions = accurate_submissions + ?3
             WHERE id = ?4",
            params![new_score, at, increment_accurate as i64, affiliate_id],
        )?;
        Ok(())
    }

    fn set_post_reconciled(&self, post_id: i64, reconciled: bool) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE posts SET is_reconciled = ?1 WHERE id = ?2",
            params![reconciled as i64, post_id],
        )?;
        Ok(())
    }

    fn insert_alert(&self, alert: NewAlert, at: DateTime<Utc>) -> Result<Alert, RepoError> {
        let conn = self.conn.lock();
        let threshold_json = serde_json::to_string(&alert.threshold_breached)?;
        conn.execute(
            "INSERT INTO alerts
                (reconciliation_log_id, affiliate_id, platform_id, alert_type, title, message,
                 category, severity, status, threshold_breached, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'OPEN', ?9, ?10)",
            params![
                alert.reconciliation_log_id,
                alert.affiliate_id,
                alert.platform_id,
                alert.alert_type.as_wire_str(),
                alert.title,
                alert.message,
                alert.category.as_wire_str(),
                alert.severity.as_wire_str(),
                threshold_json,
                at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(alert.into_alert(id, at))
    }

    fn alert_exists_for_log(&self, reconciliation_log_id: i64) -> Result<bool, RepoError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE reconciliation_log_id = ?1",
            params![reconciliation_log_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn prior_high_discrepancy_alert_times(&self, affiliate_id: i64, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, RepoError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT created_at FROM alerts
             WHERE affiliate_id = ?1 AND alert_type = 'HIGH_DISCREPANCY' AND created_at >= ?2
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![affiliate_id, since], |row| row.get::<_, DateTime<Utc>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn create_affiliate_report(
        &self,
        post_id: i64,
        affiliate_id: i64,
        claim: Claim,
        suspicion_flags: HashMap<String, SuspicionFlag>,
        submitted_at: DateTime<Utc>,
        method: SubmissionMethod,
    ) -> Result<i64, RepoError> {
        let conn = self.conn.lock();
        let flags_json = serde_json::to_string(&suspicion_flags)?;
        let method_str = match method {
            SubmissionMethod::Api => "API",
            SubmissionMethod::Discord => "DISCORD",
        };
        conn.execute(
            "INSERT INTO affiliate_reports
                (post_id, claimed_views, claimed_clicks, claimed_conversions, submitted_at, suspicion_flags, submission_method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                post_id,
                claim.views,
                claim.clicks,
                claim.conversions,
                submitted_at,
                flags_json,
                method_str,
            ],
        )?;
        let report_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE affiliates SET total_submissions = total_submissions + 1 WHERE id = ?1",
            params![affiliate_id],
        )?;
        Ok(report_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO affiliates (id, trust_score, total_submissions, accurate_submissions) VALUES (1, 0.5, 0, 0);
             INSERT INTO platforms (id, name, is_active) VALUES (1, 'instagram', 1);
             INSERT INTO posts (id, campaign_id, affiliate_id, platform_id, url, is_reconciled)
                VALUES (1, 1, 1, 1, 'https://instagram.com/p/abc', 0);
             INSERT INTO affiliate_reports (id, post_id, claimed_views, claimed_clicks, claimed_conversions, submitted_at, submission_method)
                VALUES (1, 1, 1000, 50, 5, '2026-01-01T00:00:00Z', 'API');",
        )
        .unwrap();
    }

    #[test]
    fn load_report_bundle_round_trips() {
        let repo = SqliteRepository::in_memory().unwrap();
        seed(&repo.conn.lock());
        let bundle = repo.load_report_bundle(1).unwrap();
        assert_eq!(bundle.report.claimed_views, 1000);
        assert_eq!(bundle.post.url, "https://instagram.com/p/abc");
        assert_eq!(bundle.platform.name, "instagram");
        assert!(bundle.existing_log.is_none());
    }

    #[test]
    fn ensure_reconciliation_log_is_idempotent() {
        let repo = SqliteRepository::in_memory().unwrap();
        seed(&repo.conn.lock());
        let first = repo.ensure_reconciliation_log(1).unwrap();
        let second = repo.ensure_reconciliation_log(1).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn missing_affiliate_report_is_not_found() {
        let repo = SqliteRepository::in_memory().unwrap();
        let err = repo.load_report_bundle(999).unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }
}
