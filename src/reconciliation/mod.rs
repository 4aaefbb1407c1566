//! Affiliate Post Metric Reconciliation Engine.
//!
//! Compares affiliate-claimed post metrics against platform-fetched
//! metrics, classifies the discrepancy, adjusts affiliate trust scores,
//! raises alerts, and retries missing/partial platform data on a schedule.
//! See `SPEC_FULL.md` for the full module breakdown.

pub mod adapters;
pub mod alerting;
pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod dq_validators;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod platform_fetcher;
pub mod queue;
pub mod repository;
pub mod trust;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{run_reconciliation, EngineSummary};
pub use errors::{AdapterError, EngineError, QueueError, RepoError};
pub use models::{
    Affiliate, Alert, AlertCategory, AlertSeverity, AlertType, DiscrepancyLevel, Platform, Post,
    ReconciliationLog, ReconciliationStatus, SubmissionMethod, SuspicionFlag, TrustEvent,
};
pub use queue::PriorityDelayQueue;
pub use repository::{Repository, SqliteRepository};
pub use worker::{ReconciliationJob, WorkerPool};
