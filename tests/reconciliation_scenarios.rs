//! End-to-end reconciliation scenarios against a tempfile-backed SQLite
//! database, exercising the full submit -> run_reconciliation path.

use affiliate_reconciler::reconciliation::adapters;
use affiliate_reconciler::reconciliation::circuit_breaker::CircuitBreaker;
use affiliate_reconciler::reconciliation::classifier::Claim;
use affiliate_reconciler::reconciliation::config::EngineConfig;
use affiliate_reconciler::reconciliation::dq_validators;
use affiliate_reconciler::reconciliation::engine::run_reconciliation;
use affiliate_reconciler::reconciliation::models::{ReconciliationStatus, SubmissionMethod};
use affiliate_reconciler::reconciliation::repository::{Repository, SqliteRepository};
use rusqlite::Connection;

struct TestDb {
    _file: tempfile::NamedTempFile,
    path: String,
    repo: SqliteRepository,
}

fn open_repo() -> TestDb {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap().to_string();
    let repo = SqliteRepository::open(&path).unwrap();
    TestDb { _file: file, path, repo }
}

/// Seeds one affiliate (id 1) and one platform/post pair, returning the post id.
fn seed_post(db: &TestDb, platform_name: &str, post_url: &str) -> i64 {
    let conn = Connection::open(&db.path).unwrap();
    conn.execute(
        "INSERT INTO affiliates (trust_score, total_submissions, accurate_submissions) VALUES (0.5, 0, 0)",
        [],
    )
    .unwrap();
    let affiliate_id = conn.last_insert_rowid();

    conn.execute(
        "INSERT OR IGNORE INTO platforms (name, is_active) VALUES (?1, 1)",
        rusqlite::params![platform_name],
    )
    .unwrap();
    let platform_id: i64 = conn
        .query_row(
            "SELECT id FROM platforms WHERE name = ?1",
            rusqlite::params![platform_name],
            |row| row.get(0),
        )
        .unwrap();

    conn.execute(
        "INSERT INTO posts (campaign_id, affiliate_id, platform_id, url, is_reconciled)
         VALUES (1, ?1, ?2, ?3, 0)",
        rusqlite::params![affiliate_id, platform_id, post_url],
    )
    .unwrap();
    conn.last_insert_rowid()
}

fn submit(db: &TestDb, post_id: i64, claim: Claim, config: &EngineConfig) -> i64 {
    let affiliate_id = 1;
    let previous = db.repo.previous_claim(post_id, -1).unwrap();
    let flags = dq_validators::evaluate_submission(&claim, previous.as_ref(), &config.data_quality);
    db.repo
        .create_affiliate_report(post_id, affiliate_id, claim, flags, chrono::Utc::now(), SubmissionMethod::Api)
        .unwrap()
}

/// Scans sequential post URLs on a platform until the mock adapter resolves
/// to a clean fetch (all three metrics present, no simulated failure).
fn clean_url(platform: &str) -> String {
    let adapter = adapters::lookup(platform).unwrap();
    for i in 0.. {
        let url = format!("https://{platform}.example/p/{i}");
        if let Ok(m) = adapter.fetch(&url) {
            if m.views.is_some() && m.clicks.is_some() && m.conversions.is_some() {
                return url;
            }
        }
    }
    unreachable!()
}

#[test]
fn submit_then_run_produces_a_known_status() {
    let db = open_repo();
    let config = EngineConfig::default();
    let url = clean_url("instagram");
    let post_id = seed_post(&db, "instagram", &url);

    let claim = Claim { views: 1000, clicks: 50, conversions: 5, evidence: None };
    let report_id = submit(&db, post_id, claim, &config);

    let breaker = CircuitBreaker::new(config.circuit_breaker);
    let summary = run_reconciliation(&db.repo, &breaker, &config, report_id).unwrap();

    assert!(matches!(
        summary.status,
        ReconciliationStatus::Matched
            | ReconciliationStatus::DiscrepancyLow
            | ReconciliationStatus::DiscrepancyMedium
            | ReconciliationStatus::DiscrepancyHigh
            | ReconciliationStatus::AffiliateOverclaimed
    ));
    assert_eq!(summary.attempt_count, 1);
}

#[test]
fn missing_platform_data_schedules_a_retry() {
    let db = open_repo();
    let config = EngineConfig::default();
    let post_id = seed_post(&db, "friendster", "https://friendster.example/p/1");

    let claim = Claim { views: 1000, clicks: 50, conversions: 5, evidence: None };
    let report_id = submit(&db, post_id, claim, &config);

    let breaker = CircuitBreaker::new(config.circuit_breaker);
    let summary = run_reconciliation(&db.repo, &breaker, &config, report_id).unwrap();

    assert_eq!(summary.status, ReconciliationStatus::MissingPlatformData);
    assert!(summary.scheduled_retry_at.is_some());
    assert_eq!(summary.error_code.as_deref(), Some("adapter_missing"));
}

#[test]
fn overclaim_raises_a_fraud_alert_exactly_once() {
    let db = open_repo();
    let config = EngineConfig::default();
    let url = clean_url("tiktok");
    let post_id = seed_post(&db, "tiktok", &url);

    let adapter = adapters::lookup("tiktok").unwrap();
    let platform_metrics = adapter.fetch(&url).unwrap();
    let claim = Claim {
        views: platform_metrics.views.unwrap() * 10,
        clicks: platform_metrics.clicks.unwrap(),
        conversions: platform_metrics.conversions.unwrap(),
        evidence: None,
    };

    let report_id = submit(&db, post_id, claim, &config);
    let breaker = CircuitBreaker::new(config.circuit_breaker);

    let first = run_reconciliation(&db.repo, &breaker, &config, report_id).unwrap();
    assert_eq!(first.status, ReconciliationStatus::AffiliateOverclaimed);

    let conn = Connection::open(&db.path).unwrap();
    let alert_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM alerts WHERE category = 'FRAUD'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(alert_count, 1);

    let log_id: i64 = conn
        .query_row(
            "SELECT id FROM reconciliation_logs WHERE affiliate_report_id = ?1",
            rusqlite::params![report_id],
            |row| row.get(0),
        )
        .unwrap();
    assert!(db.repo.alert_exists_for_log(log_id).unwrap());
}

#[test]
fn perfect_match_raises_affiliate_trust_score() {
    let db = open_repo();
    let config = EngineConfig::default();
    let url = clean_url("youtube");
    let post_id = seed_post(&db, "youtube", &url);

    let adapter = adapters::lookup("youtube").unwrap();
    let m = adapter.fetch(&url).unwrap();
    let claim = Claim {
        views: m.views.unwrap(),
        clicks: m.clicks.unwrap(),
        conversions: m.conversions.unwrap(),
        evidence: None,
    };

    let report_id = submit(&db, post_id, claim, &config);
    let breaker = CircuitBreaker::new(config.circuit_breaker);
    let summary = run_reconciliation(&db.repo, &breaker, &config, report_id).unwrap();

    assert_eq!(summary.status, ReconciliationStatus::Matched);
    assert_eq!(summary.new_trust_score, Some(0.5 + config.trust.events["perfect_match"]));

    let bundle = db.repo.load_report_bundle(report_id).unwrap();
    assert!(bundle.post.is_reconciled);
}
