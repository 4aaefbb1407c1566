//! Domain entities and wire-stable enums for the reconciliation core.
//!
//! Enum variants carry explicit `#[serde(rename = ...)]` so the on-disk/JSON
//! representation stays exactly the SCREAMING_SNAKE_CASE identifiers the
//! original system used, independent of Rust naming conventions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationStatus {
    #[serde(rename = "MATCHED")]
    Matched,
    #[serde(rename = "DISCREPANCY_LOW")]
    DiscrepancyLow,
    #[serde(rename = "DISCREPANCY_MEDIUM")]
    DiscrepancyMedium,
    #[serde(rename = "DISCREPANCY_HIGH")]
    DiscrepancyHigh,
    #[serde(rename = "AFFILIATE_OVERCLAIMED")]
    AffiliateOverclaimed,
    #[serde(rename = "MISSING_PLATFORM_DATA")]
    MissingPlatformData,
    #[serde(rename = "INCOMPLETE_PLATFORM_DATA")]
    IncompletePlatformData,
    #[serde(rename = "UNVERIFIABLE")]
    Unverifiable,
    #[serde(rename = "SKIPPED_SUSPENDED")]
    SkippedSuspended,
}

impl ReconciliationStatus {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Matched => "MATCHED",
            Self::DiscrepancyLow => "DISCREPANCY_LOW",
            Self::DiscrepancyMedium => "DISCREPANCY_MEDIUM",
            Self::DiscrepancyHigh => "DISCREPANCY_HIGH",
            Self::AffiliateOverclaimed => "AFFILIATE_OVERCLAIMED",
            Self::MissingPlatformData => "MISSING_PLATFORM_DATA",
            Self::IncompletePlatformData => "INCOMPLETE_PLATFORM_DATA",
            Self::Unverifiable => "UNVERIFIABLE",
            Self::SkippedSuspended => "SKIPPED_SUSPENDED",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        Some(match s {
            "MATCHED" => Self::Matched,
            "DISCREPANCY_LOW" => Self::DiscrepancyLow,
            "DISCREPANCY_MEDIUM" => Self::DiscrepancyMedium,
            "DISCREPANCY_HIGH" => Self::DiscrepancyHigh,
            "AFFILIATE_OVERCLAIMED" => Self::AffiliateOverclaimed,
            "MISSING_PLATFORM_DATA" => Self::MissingPlatformData,
            "INCOMPLETE_PLATFORM_DATA" => Self::IncompletePlatformData,
            "UNVERIFIABLE" => Self::Unverifiable,
            "SKIPPED_SUSPENDED" => Self::SkippedSuspended,
            _ => return None,
        })
    }

    /// Statuses after which no further retries are ever scheduled, used by
    /// the engine to decide whether a post becomes `is_reconciled`.
    pub fn is_terminal_candidate(&self) -> bool {
        matches!(
            self,
            Self::Matched | Self::AffiliateOverclaimed | Self::DiscrepancyHigh
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl DiscrepancyLevel {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustEvent {
    #[serde(rename = "perfect_match")]
    PerfectMatch,
    #[serde(rename = "minor_discrepancy")]
    MinorDiscrepancy,
    #[serde(rename = "medium_discrepancy")]
    MediumDiscrepancy,
    #[serde(rename = "high_discrepancy")]
    HighDiscrepancy,
    #[serde(rename = "overclaim")]
    Overclaim,
    /// Reserved: never produced by [`crate::reconciliation::classifier`]
    /// today. Kept wired through `apply_trust_event` for a future
    /// "impossible claim" validation rule (see SPEC_FULL.md §9).
    #[serde(rename = "impossible_submission")]
    ImpossibleSubmission,
    #[serde(rename = "manual_adjust")]
    ManualAdjust,
}

impl TrustEvent {
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::PerfectMatch => "perfect_match",
            Self::MinorDiscrepancy => "minor_discrepancy",
            Self::MediumDiscrepancy => "medium_discrepancy",
            Self::HighDiscrepancy => "high_discrepancy",
            Self::Overclaim => "overclaim",
            Self::ImpossibleSubmission => "impossible_submission",
            Self::ManualAdjust => "manual_adjust",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "HIGH_DISCREPANCY")]
    HighDiscrepancy,
    #[serde(rename = "MISSING_DATA")]
    MissingData,
    #[serde(rename = "SUSPICIOUS_CLAIM")]
    SuspiciousClaim,
    #[serde(rename = "SYSTEM_ERROR")]
    SystemError,
}

impl AlertType {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::HighDiscrepancy => "HIGH_DISCREPANCY",
            Self::MissingData => "MISSING_DATA",
            Self::SuspiciousClaim => "SUSPICIOUS_CLAIM",
            Self::SystemError => "SYSTEM_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl AlertSeverity {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCategory {
    #[serde(rename = "DATA_QUALITY")]
    DataQuality,
    #[serde(rename = "FRAUD")]
    Fraud,
    #[serde(rename = "SYSTEM_HEALTH")]
    SystemHealth,
}

impl AlertCategory {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::DataQuality => "DATA_QUALITY",
            Self::Fraud => "FRAUD",
            Self::SystemHealth => "SYSTEM_HEALTH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "RESOLVED")]
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionMethod {
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "DISCORD")]
    Discord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affiliate {
    pub id: i64,
    pub trust_score: f64,
    pub total_submissions: i64,
    pub accurate_submissions: i64,
    pub last_trust_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub campaign_id: i64,
    pub affiliate_id: i64,
    pub platform_id: i64,
    pub url: String,
    pub is_reconciled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionFlag {
    pub key: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub severity: String,
    pub message: String,
    pub previous: Option<i64>,
    pub current: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateReport {
    pub id: i64,
    pub post_id: i64,
    pub claimed_views: i64,
    pub claimed_clicks: i64,
    pub claimed_conversions: i64,
    pub submitted_at: DateTime<Utc>,
    pub suspicion_flags: HashMap<String, SuspicionFlag>,
    pub submission_method: SubmissionMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformReport {
    pub id: i64,
    pub post_id: i64,
    pub platform_id: i64,
    pub views: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub raw_data: HashMap<String, Option<i64>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub id: i64,
    pub affiliate_report_id: i64,
    pub status: ReconciliationStatus,
    pub discrepancy_level: Option<DiscrepancyLevel>,
    pub views_discrepancy: i64,
    pub clicks_discrepancy: i64,
    pub conversions_discrepancy: i64,
    pub views_diff_pct: Option<f64>,
    pub clicks_diff_pct: Option<f64>,
    pub conversions_diff_pct: Option<f64>,
    pub max_discrepancy_pct: Option<f64>,
    pub confidence_ratio: Option<f64>,
    pub missing_fields: Vec<String>,
    pub attempt_count: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub scheduled_retry_at: Option<DateTime<Utc>>,
    pub elapsed_hours: f64,
    pub trust_delta: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub rate_limited: bool,
    pub platform_report_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub reconciliation_log_id: i64,
    pub affiliate_id: i64,
    pub platform_id: i64,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub threshold_breached: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Everything `run_reconciliation` needs hydrated from one `load_affiliate_report` call.
#[derive(Debug, Clone)]
pub struct ReportBundle {
    pub report: AffiliateReport,
    pub post: Post,
    pub platform: Platform,
    pub affiliate: Affiliate,
    pub existing_log: Option<ReconciliationLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_strings_are_stable() {
        assert_eq!(ReconciliationStatus::Matched.as_wire_str(), "MATCHED");
        assert_eq!(
            ReconciliationStatus::AffiliateOverclaimed.as_wire_str(),
            "AFFILIATE_OVERCLAIMED"
        );
        assert_eq!(
            ReconciliationStatus::from_wire_str("DISCREPANCY_HIGH"),
            Some(ReconciliationStatus::DiscrepancyHigh)
        );
        assert_eq!(ReconciliationStatus::from_wire_str("nonsense"), None);
    }

    #[test]
    fn terminal_candidates_match_spec() {
        assert!(ReconciliationStatus::Matched.is_terminal_candidate());
        assert!(ReconciliationStatus::AffiliateOverclaimed.is_terminal_candidate());
        assert!(ReconciliationStatus::DiscrepancyHigh.is_terminal_candidate());
        assert!(!ReconciliationStatus::MissingPlatformData.is_terminal_candidate());
        assert!(!ReconciliationStatus::IncompletePlatformData.is_terminal_candidate());
    }

    #[test]
    fn trust_event_serde_roundtrip() {
        let json = serde_json::to_string(&TrustEvent::Overclaim).unwrap();
        assert_eq!(json, r#""overclaim""#);
        let back: TrustEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TrustEvent::Overclaim);
    }
}
