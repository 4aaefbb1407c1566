//! Worker pool: threads pulling jobs off the queue and running them through
//! the engine, re-enqueuing retries and recording a bounded diagnostic trail.

use crate::reconciliation::circuit_breaker::CircuitBreaker;
use crate::reconciliation::config::EngineConfig;
use crate::reconciliation::engine::{self, EngineSummary};
use crate::reconciliation::queue::PriorityDelayQueue;
use crate::reconciliation::repository::Repository;
use crate::reconciliation::trust;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// One reconciliation job: which affiliate report to (re-)process.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationJob {
    pub affiliate_report_id: i64,
}

/// Recent outcomes kept in memory for `queue-status`/diagnostics, not
/// persisted — this is an operator-facing tail, not an audit log.
#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    pub affiliate_report_id: i64,
    pub outcome: Result<EngineSummary, String>,
    pub at: chrono::DateTime<Utc>,
}

const DIAGNOSTIC_CAPACITY: usize = 200;

struct Diagnostics {
    entries: Mutex<VecDeque<DiagnosticEntry>>,
}

impl Diagnostics {
    fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_CAPACITY)),
        }
    }

    fn push(&self, entry: DiagnosticEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= DIAGNOSTIC_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn recent(&self) -> Vec<DiagnosticEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

/// A fixed-size pool of blocking worker threads sharing one queue, one
/// circuit breaker (keyed internally by platform) and one repository.
pub struct WorkerPool {
    queue: Arc<PriorityDelayQueue<ReconciliationJob>>,
    handles: Vec<JoinHandle<()>>,
    diagnostics: Arc<Diagnostics>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads, each looping on `queue.dequeue` until
    /// the queue reports shutdown and is fully drained.
    pub fn spawn(
        num_workers: usize,
        queue: Arc<PriorityDelayQueue<ReconciliationJob>>,
        repo: Arc<dyn Repository>,
        breaker: Arc<CircuitBreaker>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let diagnostics = Arc::new(Diagnostics::new());
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let queue = Arc::clone(&queue);
            let repo = Arc::clone(&repo);
            let breaker = Arc::clone(&breaker);
            let config = Arc::clone(&config);
            let diagnostics = Arc::clone(&diagnostics);

            let handle = thread::Builder::new()
                .name(format!("reconciliation-worker-{worker_id}"))
                .spawn(move || run_worker_loop(worker_id, queue, repo, breaker, config, diagnostics))
                .expect("failed to spawn reconciliation worker thread");
            handles.push(handle);
        }

        Self {
            queue,
            handles,
            diagnostics,
        }
    }

    pub fn recent_diagnostics(&self) -> Vec<DiagnosticEntry> {
        self.diagnostics.recent()
    }

    /// Signals shutdown and blocks until every worker has drained the queue
    /// and exited.
    pub fn shutdown(self) {
        self.queue.shutdown();
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker_loop(
    worker_id: usize,
    queue: Arc<PriorityDelayQueue<ReconciliationJob>>,
    repo: Arc<dyn Repository>,
    breaker: Arc<CircuitBreaker>,
    config: Arc<EngineConfig>,
    diagnostics: Arc<Diagnostics>,
) {
    info!(worker_id, "reconciliation worker started");
    loop {
        let job = match queue.dequeue(true, Some(Duration::from_secs(1))) {
            Some(job) => job,
            None => {
                if queue.snapshot().shutdown && queue.depth() == 0 {
                    break;
                }
                continue;
            }
        };

        process_job(worker_id, job, &*repo, &breaker, &config, &queue, &diagnostics);
    }
    info!(worker_id, "reconciliation worker stopped");
}

fn process_job(
    worker_id: usize,
    job: ReconciliationJob,
    repo: &dyn Repository,
    breaker: &CircuitBreaker,
    config: &EngineConfig,
    queue: &PriorityDelayQueue<ReconciliationJob>,
    diagnostics: &Diagnostics,
) {
    let result = engine::run_reconciliation(repo, breaker, config, job.affiliate_report_id);

    match &result {
        Ok(summary) => {
            info!(
                worker_id,
                affiliate_report_id = job.affiliate_report_id,
                status = summary.status.as_wire_str(),
                "reconciliation job processed"
            );
            if let Some(retry_at) = summary.scheduled_retry_at {
                reschedule(repo, queue, job, summary, retry_at, config);
            }
        }
        Err(e) => {
            error!(
                worker_id,
                affiliate_report_id = job.affiliate_report_id,
                error = %e,
                "reconciliation job failed"
            );
        }
    }

    diagnostics.push(DiagnosticEntry {
        affiliate_report_id: job.affiliate_report_id,
        outcome: result.map_err(|e| e.to_string()),
        at: Utc::now(),
    });
}

/// Re-enqueues a job whose engine run scheduled a retry, recomputing
/// priority from the affiliate's current trust bucket rather than reusing
/// whatever priority the job was originally submitted with — trust may have
/// shifted since the last attempt.
fn reschedule(
    repo: &dyn Repository,
    queue: &PriorityDelayQueue<ReconciliationJob>,
    job: ReconciliationJob,
    summary: &EngineSummary,
    retry_at: chrono::DateTime<Utc>,
    config: &EngineConfig,
) {
    let bundle = match repo.load_report_bundle(job.affiliate_report_id) {
        Ok(b) => b,
        Err(e) => {
            error!(
                affiliate_report_id = job.affiliate_report_id,
                error = %e,
                "could not reload report bundle to reschedule retry"
            );
            return;
        }
    };

    let bucket = trust::bucket_for_score(bundle.affiliate.trust_score, &config.trust);
    let has_flags = !bundle.report.suspicion_flags.is_empty();
    let priority = trust::priority_for_bucket(bucket, has_flags);

    let delay_seconds = (retry_at - Utc::now()).num_milliseconds().max(0) as f64 / 1000.0;

    if let Err(e) = queue.enqueue(job, priority, delay_seconds) {
        warn!(
            affiliate_report_id = job.affiliate_report_id,
            error = %e,
            "failed to re-enqueue scheduled retry"
        );
    } else {
        info!(
            affiliate_report_id = job.affiliate_report_id,
            priority,
            delay_seconds,
            missing_fields = ?summary.missing_fields,
            "retry re-enqueued"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::config::{CircuitBreakerSettings, QueueSettings};
    use std::collections::HashMap;

    fn queue_settings() -> QueueSettings {
        let mut priorities = HashMap::new();
        priorities.insert("high".to_string(), 0);
        priorities.insert("normal".to_string(), 5);
        priorities.insert("low".to_string(), 10);
        QueueSettings {
            priorities,
            warn_depth: 1000,
            max_in_memory: 5000,
        }
    }

    #[test]
    fn pool_drains_and_shuts_down_cleanly() {
        use crate::reconciliation::repository::SqliteRepository;

        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::in_memory().unwrap());
        let queue = Arc::new(PriorityDelayQueue::<ReconciliationJob>::new(queue_settings()));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerSettings::default()));
        let config = Arc::new(EngineConfig::default());

        let pool = WorkerPool::spawn(2, Arc::clone(&queue), repo, breaker, config);

        // no jobs enqueued; workers should idle and then shut down promptly
        pool.shutdown();
    }
}
