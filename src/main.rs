//! Affiliate Post Metric Reconciliation Engine — CLI entry point.
//!
//! Wires logging, configuration, the SQLite repository, and the worker pool
//! together behind a small `clap` command surface. This binary is the only
//! outer surface the core ships with: no HTTP server, no auth, no rate
//! limiting — those are out of scope (see `SPEC_FULL.md` §1 Non-goals). It
//! is a local operator tool: `submit` and `run` assume the `posts` and
//! `affiliates` rows already exist (campaign tooling that creates them is
//! out of scope here too).

use affiliate_reconciler::reconciliation::circuit_breaker::CircuitBreaker;
use affiliate_reconciler::reconciliation::classifier::Claim;
use affiliate_reconciler::reconciliation::config::EngineConfig;
use affiliate_reconciler::reconciliation::dq_validators;
use affiliate_reconciler::reconciliation::engine;
use affiliate_reconciler::reconciliation::models::SubmissionMethod;
use affiliate_reconciler::reconciliation::queue::PriorityDelayQueue;
use affiliate_reconciler::reconciliation::repository::{Repository, SqliteRepository};
use affiliate_reconciler::reconciliation::trust;
use affiliate_reconciler::reconciliation::worker::{ReconciliationJob, WorkerPool};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "reconcile", about = "Affiliate post metric reconciliation engine")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, env = "RECONCILE_DB_PATH", default_value = "reconcile.db")]
    db_path: String,

    /// Optional TOML file layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new affiliate report for an existing post and enqueue it.
    Submit {
        #[arg(long)]
        post_id: i64,
        #[arg(long)]
        affiliate_id: i64,
        #[arg(long)]
        views: i64,
        #[arg(long)]
        clicks: i64,
        #[arg(long)]
        conversions: i64,
        /// JSON evidence payload (e.g. a screenshot URL) supporting the claim.
        #[arg(long)]
        evidence: Option<String>,
    },
    /// Run one reconciliation attempt synchronously and print its summary.
    Run {
        #[arg(long)]
        report_id: i64,
    },
    /// Start the worker pool and block until Ctrl-C.
    Worker {
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Print the queue's current depth snapshot.
    QueueStatus,
}

/// Builds an `EngineConfig` from the optional `--config` TOML file layered
/// over `EngineConfig::default()`, matching the teacher's
/// `DataSourceKillSwitch::new()` env-fallback style for anything not
/// covered by the file.
fn build_config(config_path: Option<&str>) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    if let Some(path) = config_path {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"))?;
        config = toml::from_str(&contents).with_context(|| format!("parsing config file {path}"))?;
    }
    Ok(config)
}

fn open_repository(db_path: &str) -> Result<Arc<dyn Repository>> {
    let repo = SqliteRepository::open(db_path)
        .with_context(|| format!("opening reconciliation database at {db_path}"))?;
    Ok(Arc::new(repo))
}

/// The submission→queue hook from §4.13: validate, persist, enqueue.
fn run_submit(
    repo: &dyn Repository,
    queue: &PriorityDelayQueue<ReconciliationJob>,
    config: &EngineConfig,
    post_id: i64,
    affiliate_id: i64,
    claim: Claim,
) -> Result<i64> {
    let previous = repo
        .previous_claim(post_id, -1)
        .context("loading affiliate's previous claim for this post")?;
    let suspicion_flags =
        dq_validators::evaluate_submission(&claim, previous.as_ref(), &config.data_quality);

    let report_id = repo
        .create_affiliate_report(
            post_id,
            affiliate_id,
            claim,
            suspicion_flags,
            chrono::Utc::now(),
            SubmissionMethod::Api,
        )
        .context("creating affiliate report")?;

    let bundle = repo
        .load_report_bundle(report_id)
        .context("reloading freshly submitted report")?;
    let bucket = trust::bucket_for_score(bundle.affiliate.trust_score, &config.trust);
    let has_flags = !bundle.report.suspicion_flags.is_empty();
    let priority = trust::priority_for_bucket(bucket, has_flags);

    queue
        .enqueue(ReconciliationJob { affiliate_report_id: report_id }, priority, 0.0)
        .context("enqueueing reconciliation job")?;

    Ok(report_id)
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = build_config(cli.config.as_deref())?;

    match cli.command {
        Command::Submit { post_id, affiliate_id, views, clicks, conversions, evidence } => {
            let repo = open_repository(&cli.db_path)?;
            let queue = PriorityDelayQueue::<ReconciliationJob>::new(config.queue.clone());
            let evidence = evidence
                .map(|raw| serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)));
            let claim = Claim { views, clicks, conversions, evidence };
            let report_id = run_submit(&*repo, &queue, &config, post_id, affiliate_id, claim)?;
            println!("submitted affiliate_report_id={report_id}");
        }
        Command::Run { report_id } => {
            let repo = open_repository(&cli.db_path)?;
            let breaker = CircuitBreaker::new(config.circuit_breaker);
            let summary = engine::run_reconciliation(&*repo, &breaker, &config, report_id)
                .context("running reconciliation")?;
            let json = serde_json::to_string_pretty(&SummaryJson::from(&summary))
                .context("serializing summary")?;
            println!("{json}");
        }
        Command::Worker { workers } => {
            let repo = open_repository(&cli.db_path)?;
            let queue = Arc::new(PriorityDelayQueue::<ReconciliationJob>::new(config.queue.clone()));
            let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
            let config = Arc::new(config);

            let pool = WorkerPool::spawn(workers, Arc::clone(&queue), repo, breaker, config);

            tracing::info!(workers, "worker pool started, waiting for Ctrl-C");
            wait_for_ctrl_c()?;
            tracing::info!("shutdown signal received, draining queue");
            pool.shutdown();
        }
        Command::QueueStatus => {
            let queue = PriorityDelayQueue::<ReconciliationJob>::new(config.queue.clone());
            let snapshot = queue.snapshot();
            println!(
                "depth={} ready={} scheduled={} shutdown={}",
                snapshot.depth, snapshot.ready, snapshot.scheduled, snapshot.shutdown
            );
        }
    }

    Ok(())
}

/// Blocks the calling thread until SIGINT, via a minimal single-threaded
/// `tokio` runtime — the teacher's stack already depends on `tokio` for its
/// server, so this reuses it rather than adding a dedicated signal crate.
fn wait_for_ctrl_c() -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building ctrl-c wait runtime")?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("waiting for shutdown signal")?;
    Ok(())
}

#[derive(serde::Serialize)]
struct SummaryJson {
    status: &'static str,
    attempt_count: i64,
    scheduled_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    trust_delta: Option<f64>,
    new_trust_score: Option<f64>,
    discrepancy_level: Option<&'static str>,
    max_discrepancy_pct: Option<f64>,
    rate_limited: bool,
    error_code: Option<String>,
    missing_fields: Vec<String>,
}

impl From<&engine::EngineSummary> for SummaryJson {
    fn from(s: &engine::EngineSummary) -> Self {
        Self {
            status: s.status.as_wire_str(),
            attempt_count: s.attempt_count,
            scheduled_retry_at: s.scheduled_retry_at,
            trust_delta: s.trust_delta,
            new_trust_score: s.new_trust_score,
            discrepancy_level: s.discrepancy_level.map(|d| d.as_wire_str()),
            max_discrepancy_pct: s.max_discrepancy_pct,
            rate_limited: s.rate_limited,
            error_code: s.error_code.clone(),
            missing_fields: s.missing_fields.clone(),
        }
    }
}
