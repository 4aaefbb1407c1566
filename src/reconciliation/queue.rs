//! Priority + delay job queue: two binary heaps behind a mutex/condvar.
//!
//! `ready_heap` holds jobs eligible to run now, ordered by
//! `(priority_value, sequence)`. `scheduled_heap` holds jobs not yet due,
//! ordered by `(ready_at, priority_value, sequence)`. Promotion from
//! scheduled to ready happens lazily, on every `dequeue`/`enqueue`, so a
//! far-future high-priority job sitting in `scheduled_heap` never blocks a
//! currently-ready low-priority job in `ready_heap` — the two heaps are
//! independent structures.

use crate::reconciliation::config::QueueSettings;
use crate::reconciliation::errors::QueueError;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
struct ReadyItem<J> {
    priority_value: i64,
    seq: u64,
    job: J,
}

impl<J> PartialEq for ReadyItem<J> {
    fn eq(&self, other: &Self) -> bool {
        self.priority_value == other.priority_value && self.seq == other.seq
    }
}
impl<J> Eq for ReadyItem<J> {}
impl<J> PartialOrd for ReadyItem<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<J> Ord for ReadyItem<J> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority_value, self.seq).cmp(&(other.priority_value, other.seq))
    }
}

#[derive(Debug, Clone)]
struct ScheduledItem<J> {
    ready_at: DateTime<Utc>,
    priority_value: i64,
    seq: u64,
    job: J,
}

impl<J> PartialEq for ScheduledItem<J> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
            && self.priority_value == other.priority_value
            && self.seq == other.seq
    }
}
impl<J> Eq for ScheduledItem<J> {}
impl<J> PartialOrd for ScheduledItem<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<J> Ord for ScheduledItem<J> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.priority_value, self.seq).cmp(&(
            other.ready_at,
            other.priority_value,
            other.seq,
        ))
    }
}

struct Inner<J> {
    ready_heap: BinaryHeap<Reverse<ReadyItem<J>>>,
    scheduled_heap: BinaryHeap<Reverse<ScheduledItem<J>>>,
    next_seq: u64,
    shutdown: bool,
}

/// Snapshot of queue depths, for health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub ready: usize,
    pub scheduled: usize,
    pub shutdown: bool,
}

pub struct PriorityDelayQueue<J> {
    settings: QueueSettings,
    inner: Mutex<Inner<J>>,
    cv: Condvar,
}

impl<J: Clone> PriorityDelayQueue<J> {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                ready_heap: BinaryHeap::new(),
                scheduled_heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn promote_scheduled(inner: &mut Inner<J>) {
        let now = Utc::now();
        while let Some(Reverse(top)) = inner.scheduled_heap.peek() {
            if top.ready_at > now {
                break;
            }
            let Reverse(item) = inner.scheduled_heap.pop().unwrap();
            inner.ready_heap.push(Reverse(ReadyItem {
                priority_value: item.priority_value,
                seq: item.seq,
                job: item.job,
            }));
        }
    }

    pub fn enqueue(
        &self,
        job: J,
        priority_label: &str,
        delay_seconds: f64,
    ) -> Result<(), QueueError> {
        let priority_value = *self
            .settings
            .priorities
            .get(priority_label)
            .ok_or_else(|| QueueError::UnknownPriority(priority_label.to_string()))?;

        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(QueueError::Shutdown);
        }
        let total = inner.ready_heap.len() + inner.scheduled_heap.len();
        if total >= self.settings.max_in_memory {
            return Err(QueueError::CapacityExceeded {
                max_in_memory: self.settings.max_in_memory,
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let now = Utc::now();
        let ready_at = now + chrono::Duration::milliseconds((delay_seconds.max(0.0) * 1000.0) as i64);

        if ready_at <= now {
            inner.ready_heap.push(Reverse(ReadyItem {
                priority_value,
                seq,
                job,
            }));
        } else {
            inner.scheduled_heap.push(Reverse(ScheduledItem {
                ready_at,
                priority_value,
                seq,
                job,
            }));
        }

        let depth = inner.ready_heap.len() + inner.scheduled_heap.len();
        if depth >= self.settings.warn_depth {
            warn!(depth, warn_depth = self.settings.warn_depth, "queue depth high");
        }
        self.cv.notify_all();
        Ok(())
    }

    /// Blocking/non-blocking dequeue. `timeout = None` with `block = true`
    /// waits indefinitely (bounded by the next scheduled item, if any).
    pub fn dequeue(&self, block: bool, timeout: Option<Duration>) -> Option<J> {
        let mut inner = self.inner.lock();
        let deadline = timeout.map(|t| std::time::Instant::now() + t);

        loop {
            Self::promote_scheduled(&mut inner);

            if let Some(Reverse(item)) = inner.ready_heap.pop() {
                return Some(item.job);
            }

            if inner.shutdown {
                return None;
            }

            if !block {
                return None;
            }

            if let Some(d) = deadline {
                if std::time::Instant::now() >= d {
                    return None;
                }
            }

            let next_scheduled_wait = inner
                .scheduled_heap
                .peek()
                .map(|Reverse(item)| (item.ready_at - Utc::now()).to_std().unwrap_or(Duration::from_millis(0)));
            let remaining_deadline =
                deadline.map(|d| d.saturating_duration_since(std::time::Instant::now()));

            let wait_for = match (next_scheduled_wait, remaining_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            match wait_for {
                // already due (or overdue): loop straight back to promote it
                Some(d) if d.is_zero() => continue,
                Some(d) => {
                    self.cv.wait_for(&mut inner, d);
                }
                None => {
                    self.cv.wait(&mut inner);
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        let inner = self.inner.lock();
        inner.ready_heap.len() + inner.scheduled_heap.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        QueueSnapshot {
            depth: inner.ready_heap.len() + inner.scheduled_heap.len(),
            ready: inner.ready_heap.len(),
            scheduled: inner.scheduled_heap.len(),
            shutdown: inner.shutdown,
        }
    }

    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.cv.notify_all();
    }

    /// Test-only: clear both heaps without affecting the shutdown flag.
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.ready_heap.clear();
        inner.scheduled_heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> QueueSettings {
        let mut priorities = std::collections::HashMap::new();
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
    fn dequeues_by_priority_then_fifo() {
        let q: PriorityDelayQueue<&'static str> = PriorityDelayQueue::new(settings());
        q.enqueue("low-job", "low", 0.0).unwrap();
        q.enqueue("normal-job", "normal", 0.0).unwrap();
        q.enqueue("high-job", "high", 0.0).unwrap();

        assert_eq!(q.dequeue(false, None), Some("high-job"));
        assert_eq!(q.dequeue(false, None), Some("normal-job"));
        assert_eq!(q.dequeue(false, None), Some("low-job"));
        assert_eq!(q.dequeue(false, None), None);
    }

    #[test]
    fn fifo_tie_break_within_same_priority() {
        let q: PriorityDelayQueue<i32> = PriorityDelayQueue::new(settings());
        for i in 0..5 {
            q.enqueue(i, "normal", 0.0).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.dequeue(false, None), Some(i));
        }
    }

    #[test]
    fn far_future_high_priority_does_not_starve_ready_low_priority() {
        let q: PriorityDelayQueue<&'static str> = PriorityDelayQueue::new(settings());
        q.enqueue("future-high", "high", 60.0).unwrap();
        q.enqueue("ready-normal", "normal", 0.0).unwrap();
        assert_eq!(q.dequeue(false, None), Some("ready-normal"));
        // the scheduled item is still pending, not ready yet
        assert_eq!(q.dequeue(false, None), None);
    }

    #[test]
    fn capacity_exceeded_is_rejected() {
        let mut priorities = std::collections::HashMap::new();
        priorities.insert("normal".to_string(), 5);
        let settings = QueueSettings {
            priorities,
            warn_depth: 1,
            max_in_memory: 1,
        };
        let q: PriorityDelayQueue<i32> = PriorityDelayQueue::new(settings);
        q.enqueue(1, "normal", 0.0).unwrap();
        assert_eq!(
            q.enqueue(2, "normal", 0.0),
            Err(QueueError::CapacityExceeded { max_in_memory: 1 })
        );
    }

    #[test]
    fn unknown_priority_is_rejected() {
        let q: PriorityDelayQueue<i32> = PriorityDelayQueue::new(settings());
        assert_eq!(
            q.enqueue(1, "urgent", 0.0),
            Err(QueueError::UnknownPriority("urgent".to_string()))
        );
    }

    #[test]
    fn shutdown_drains_then_returns_none() {
        let q: PriorityDelayQueue<i32> = PriorityDelayQueue::new(settings());
        q.enqueue(1, "normal", 0.0).unwrap();
        q.shutdown();
        assert_eq!(
            q.enqueue(2, "normal", 0.0),
            Err(QueueError::Shutdown)
        );
        // still drains what was already queued
        assert_eq!(q.dequeue(true, Some(Duration::from_millis(50))), Some(1));
        assert_eq!(q.dequeue(true, Some(Duration::from_millis(50))), None);
    }

    #[test]
    fn snapshot_reports_depths() {
        let q: PriorityDelayQueue<i32> = PriorityDelayQueue::new(settings());
        q.enqueue(1, "normal", 0.0).unwrap();
        q.enqueue(2, "normal", 60.0).unwrap();
        let snap = q.snapshot();
        assert_eq!(snap.depth, 2);
        assert_eq!(snap.ready, 1);
        assert_eq!(snap.scheduled, 1);
        assert!(!snap.shutdown);
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        use std::sync::Arc;
        use std::thread;

        let q: Arc<PriorityDelayQueue<i32>> = Arc::new(PriorityDelayQueue::new(settings()));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.dequeue(true, Some(Duration::from_secs(2))));

        thread::sleep(Duration::from_millis(50));
        q.enqueue(42, "normal", 0.0).unwrap();

        assert_eq!(handle.join().unwrap(), Some(42));
    }
}
