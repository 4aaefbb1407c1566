//! Closed error enums for the reconciliation core.
//!
//! Business-meaningful failures are modeled as typed variants rather than
//! strings; only the CLI/worker boundary collapses them into `anyhow::Error`.

use thiserror::Error;

/// Failures raised by [`crate::reconciliation::queue::PriorityDelayQueue`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum QueueError {
    #[error("queue at capacity ({max_in_memory} items)")]
    CapacityExceeded { max_in_memory: usize },
    #[error("unknown priority label: {0}")]
    UnknownPriority(String),
    #[error("queue is shut down")]
    Shutdown,
}

/// Failures surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failures from a platform adapter invocation, before classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no adapter registered for platform {0:?}")]
    Missing(String),
    #[error("{0}")]
    Failed(String),
}

/// Top-level orchestrator errors that are not captured as structured log
/// fields (i.e. they abort the attempt entirely rather than recording a
/// classification outcome).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("affiliate report {0} not found")]
    ReportNotFound(i64),
    #[error(transparent)]
    Repo(#[from] RepoError),
}
