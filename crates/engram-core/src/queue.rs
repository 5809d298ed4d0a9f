//! Index queue
//!
//! The capture path and the conversation state machine enqueue
//! [`IndexJob`]s; the indexer worker drains them in batches. The queue
//! contract is the partial-batch-failure model: each received message is
//! acked or failed individually, failed messages are redelivered after
//! their visibility timeout, and a message that fails [`MAX_ATTEMPTS`]
//! times lands in the dead-letter list.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::model::IndexJob;

/// Redeliveries before a message is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default visibility timeout; must exceed the worst-case per-message
/// processing budget (120 s).
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(150);

// ============================================================================
// ERRORS
// ============================================================================

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// TRAIT
// ============================================================================

/// A received message: the job plus its redelivery bookkeeping.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Opaque receipt used to ack or fail this delivery.
    pub receipt: String,
    pub job: IndexJob,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Queue capability consumed by the capture path and the indexer.
#[async_trait]
pub trait IndexQueue: Send + Sync {
    /// Enqueue a job.
    async fn send(&self, job: IndexJob) -> Result<(), QueueError>;

    /// Receive up to `max` messages, waiting up to `wait` for the first.
    /// Received messages are invisible until acked, failed, or their
    /// visibility timeout lapses.
    async fn receive(&self, max: usize, wait: Duration) -> Vec<QueueMessage>;

    /// Acknowledge successful processing.
    async fn ack(&self, receipt: &str);

    /// Report failed messages for redelivery (or dead-letter).
    async fn report_failed(&self, receipts: &[String]);
}

// ============================================================================
// IN-PROCESS IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    job: IndexJob,
    attempts: u32,
}

#[derive(Debug)]
struct InFlight {
    entry: Entry,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, InFlight>,
    dead: Vec<IndexJob>,
    next_receipt: u64,
}

/// In-process queue with visibility timeouts and a dead-letter list.
pub struct InMemoryIndexQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    visibility: Duration,
}

impl Default for InMemoryIndexQueue {
    fn default() -> Self {
        Self::new(VISIBILITY_TIMEOUT)
    }
}

impl InMemoryIndexQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            visibility,
        }
    }

    /// Move expired in-flight messages back to ready (or dead-letter).
    fn reap_expired(inner: &mut Inner, now: Instant) {
        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(r, _)| r.clone())
            .collect();
        for receipt in expired {
            if let Some(in_flight) = inner.in_flight.remove(&receipt) {
                Self::requeue(inner, in_flight.entry);
            }
        }
    }

    fn requeue(inner: &mut Inner, entry: Entry) {
        if entry.attempts >= MAX_ATTEMPTS {
            tracing::warn!(
                job = entry.job.target_id(),
                attempts = entry.attempts,
                "index job dead-lettered"
            );
            inner.dead.push(entry.job);
        } else {
            inner.ready.push_back(entry);
        }
    }

    /// Jobs that exhausted their attempts (observability/test hook).
    pub fn dead_letters(&self) -> Vec<IndexJob> {
        self.inner.lock().map(|i| i.dead.clone()).unwrap_or_default()
    }

    /// Ready + in-flight depth (observability/test hook).
    pub fn depth(&self) -> usize {
        self.inner
            .lock()
            .map(|i| i.ready.len() + i.in_flight.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl IndexQueue for InMemoryIndexQueue {
    async fn send(&self, job: IndexJob) -> Result<(), QueueError> {
        {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| QueueError::Unavailable("queue lock poisoned".into()))?;
            inner.ready.push_back(Entry { job, attempts: 0 });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Vec<QueueMessage> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut inner = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(_) => return vec![],
                };
                let now = Instant::now();
                Self::reap_expired(&mut inner, now);

                if !inner.ready.is_empty() {
                    let mut batch = Vec::with_capacity(max.min(inner.ready.len()));
                    while batch.len() < max {
                        let Some(mut entry) = inner.ready.pop_front() else {
                            break;
                        };
                        entry.attempts += 1;
                        inner.next_receipt += 1;
                        let receipt = format!("r{}", inner.next_receipt);
                        batch.push(QueueMessage {
                            receipt: receipt.clone(),
                            job: entry.job.clone(),
                            attempt: entry.attempts,
                        });
                        inner.in_flight.insert(
                            receipt,
                            InFlight {
                                entry,
                                deadline: now + self.visibility,
                            },
                        );
                    }
                    return batch;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return vec![];
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn ack(&self, receipt: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.in_flight.remove(receipt);
        }
    }

    async fn report_failed(&self, receipts: &[String]) {
        let mut any = false;
        if let Ok(mut inner) = self.inner.lock() {
            for receipt in receipts {
                if let Some(in_flight) = inner.in_flight.remove(receipt) {
                    Self::requeue(&mut inner, in_flight.entry);
                    any = true;
                }
            }
        }
        if any {
            self.notify.notify_one();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
