//! Click recorder
//!
//! Side effects of a hit (click counter, rotation cursor, analytic event) are
//! queued here and executed by a fixed pool of workers, never on the request
//! path. The queue is bounded: when it is full the job is dropped and counted.
//! Jobs still queued when the process dies are lost; `shutdown` drains what
//! is queued before returning.
//!
//! Failures are logged and counted, never retried.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{ip::canonical, Classifier};
use crate::config::RecorderConfig;
use crate::models::NewAnalyticEvent;
use crate::storage::Storage;

/// Raw facts about one hit, classified later by a worker.
#[derive(Debug, Clone)]
pub struct Visit {
    pub timestamp: i64,
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug)]
enum Job {
    IncrementClicks { link_id: i64 },
    PersistCursor { link_id: i64, index: i64 },
    RecordEvent { link_id: i64, visit: Visit },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::IncrementClicks { .. } => "increment_clicks",
            Job::PersistCursor { .. } => "persist_cursor",
            Job::RecordEvent { .. } => "record_event",
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of recorder throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecorderStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct ClickRecorder {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl ClickRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        classifier: Arc<Classifier>,
        config: &RecorderConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    receiver: Arc::clone(&receiver),
                    storage: Arc::clone(&storage),
                    classifier: Arc::clone(&classifier),
                    counters: Arc::clone(&counters),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Queue an atomic `click_count + 1` for the link.
    pub fn increment_clicks(&self, link_id: i64) {
        self.submit(Job::IncrementClicks { link_id });
    }

    /// Queue a last-write-wins cursor update.
    pub fn persist_cursor(&self, link_id: i64, index: i64) {
        self.submit(Job::PersistCursor { link_id, index });
    }

    /// Queue classification and storage of an analytic event.
    pub fn record(&self, link_id: i64, visit: Visit) {
        self.submit(Job::RecordEvent { link_id, visit });
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs, run everything already queued, and wait for the workers.
    pub async fn shutdown(&self) {
        let sender = match self.sender.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "recorder worker ended abnormally");
            }
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            "click recorder drained"
        );
    }

    fn submit(&self, job: Job) {
        let kind = job.kind();
        let guard = match self.sender.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(job = kind, "click recorder is shut down, dropping job");
            return;
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(job = kind, "click recorder queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(job = kind, "click recorder queue closed, dropping job");
            }
        }
    }
}

struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    storage: Arc<dyn Storage>,
    classifier: Arc<Classifier>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self) {
        loop {
            // Only the worker holding the lock waits on the channel
            let job = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };

            let Some(job) = job else {
                debug!(worker = self.id, "recorder queue closed, worker exiting");
                break;
            };

            let kind = job.kind();
            match self.execute(job).await {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(worker = self.id, job = kind, error = %err, "background write failed");
                }
            }
        }
    }

    async fn execute(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::IncrementClicks { link_id } => self.storage.increment_clicks(link_id).await,
            Job::PersistCursor { link_id, index } => {
                self.storage.persist_cursor(link_id, index).await
            }
            Job::RecordEvent { link_id, visit } => {
                let user_agent = visit.user_agent.as_deref().unwrap_or_default();
                let classification = self
                    .classifier
                    .classify(visit.ip, user_agent, visit.accept_language.as_deref())
                    .await;

                let event = NewAnalyticEvent {
                    link_id,
                    timestamp: visit.timestamp,
                    ip_address: Some(canonical(visit.ip).to_string()),
                    user_agent: visit.user_agent,
                    country: classification.country,
                    city: classification.city,
                    device_type: classification.device_type,
                    browser: Some(classification.browser),
                    os: Some(classification.os),
                    referrer: visit.referrer.filter(|r| !r.is_empty()),
                };

                self.storage.record_event(&event).await
            }
        }
    }
}
