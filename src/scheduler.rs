//! Scheduler: runs bulk resync jobs one at a time, in enqueue order.
//!
//! Enqueue is idempotent per job kind while a job is waiting: a flapping
//! connection that comes up ten times before the worker gets to it still
//! yields one full resync. Once a job starts running its kind can be queued
//! again, since the catalog may have moved on during the run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::model::job::{EnqueueResult, Job, JobId, JobKind};
use crate::sync::SyncActions;
use crate::telemetry::metrics;

/// Where adapters queue follow-up work.
pub trait SchedulerHook: Send + Sync {
    /// Queue a job. `source` names the requester, for logs.
    fn enqueue(&self, kind: JobKind, source: &str) -> EnqueueResult;
}

pub struct Scheduler {
    pending: Mutex<HashMap<JobKind, JobId>>,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    shutdown: Notify,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pending: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown: Notify::new(),
        }
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Stop the worker once the current job, if any, has finished.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run queued jobs against `actions` until [`shutdown`](Self::shutdown).
    ///
    /// Only one worker may run; a second call returns an error.
    pub async fn run(&self, actions: Arc<dyn SyncActions>) -> Result<()> {
        let mut rx = lock(&self.rx)
            .take()
            .ok_or_else(|| Error::Other("scheduler worker already running".to_string()))?;

        info!("scheduler started");
        loop {
            let job = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(pending = self.pending(), "scheduler shutting down");
                    return Ok(());
                }
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => return Ok(()),
                },
            };
            self.release(&job);

            let started = Instant::now();
            let result = match job.kind {
                JobKind::FullSeriesSync => actions.update_series().await,
                JobKind::FullEpisodeSync => actions.sync_episodes().await,
                JobKind::FullMovieSync => actions.update_movies().await,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(()) => info!(job = %job.id, kind = %job.kind, source = %job.source, elapsed_ms, "job finished"),
                Err(e) => error!(job = %job.id, kind = %job.kind, elapsed_ms, "job failed: {e}"),
            }
        }
    }

    /// Forget the pending marker for a job that is about to run.
    fn release(&self, job: &Job) {
        let mut pending = lock(&self.pending);
        if pending.get(&job.kind) == Some(&job.id) {
            pending.remove(&job.kind);
        }
    }
}

impl SchedulerHook for Scheduler {
    fn enqueue(&self, kind: JobKind, source: &str) -> EnqueueResult {
        let mut pending = lock(&self.pending);
        if let Some(&canonical_id) = pending.get(&kind) {
            debug!(%kind, source, canonical = %canonical_id, "job already pending");
            count_enqueue(kind, "merged");
            return EnqueueResult::Merged { canonical_id };
        }

        let job = Job {
            id: JobId::new(),
            kind,
            source: source.to_string(),
            enqueued_at: Utc::now(),
        };
        let id = job.id;
        if self.tx.send(job).is_err() {
            warn!(%kind, source, "scheduler worker gone, job dropped");
            count_enqueue(kind, "dropped");
            return EnqueueResult::Dropped;
        }
        pending.insert(kind, id);
        debug!(%kind, source, job = %id, "job queued");
        count_enqueue(kind, "created");
        EnqueueResult::Created(id)
    }
}

fn count_enqueue(kind: JobKind, result: &'static str) {
    metrics::jobs_enqueued().add(
        1,
        &[
            KeyValue::new("job", kind.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
