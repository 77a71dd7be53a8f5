//! Background reindex job queue.
//!
//! A single worker task drains a FIFO queue of reindex jobs, so at most one
//! writer touches the database at a time while query paths keep reading.
//! Jobs that fail with a transient kind (SQLite lock/busy) are retried with
//! exponential backoff — 1 s, 2 s, 4 s — before being marked failed; any
//! other failure is terminal. Job records are retained for the process
//! lifetime so `status`/`list` can report on completed work.
//!
//! Shutdown rejects new submissions, fails still-queued jobs with kind
//! `shutdown`, lets the running job finish naturally, and returns within the
//! caller's timeout.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::indexer::{Indexer, ReindexOptions};
use crate::models::ReindexReport;
use crate::store::Store;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ReindexRequest {
    pub paths: Vec<PathBuf>,
    pub force: bool,
    pub prune_missing: bool,
}

impl ReindexRequest {
    /// Canonical key for coalescing: the sorted, deduplicated path set.
    fn path_key(&self) -> Vec<String> {
        let mut key: Vec<String> = self
            .paths
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()).display().to_string())
            .collect();
        key.sort();
        key.dedup();
        key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    RetryWait,
    Completed,
    Failed,
}

/// Point-in-time view of a job, safe to hand to callers and serialize.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    pub created_at: String,
    pub elapsed_seconds: Option<f64>,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReindexReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

struct Job {
    job_id: String,
    /// Monotonic submission order, the FIFO and listing key.
    seq: u64,
    state: JobState,
    request: ReindexRequest,
    created_at: String,
    started: Option<Instant>,
    finished: Option<Instant>,
    retries: u32,
    result: Option<ReindexReport>,
    error: Option<String>,
    error_kind: Option<String>,
}

impl Job {
    fn snapshot(&self) -> JobSnapshot {
        let elapsed = self.started.map(|s| {
            let end = self.finished.unwrap_or_else(Instant::now);
            end.duration_since(s).as_secs_f64()
        });
        JobSnapshot {
            job_id: self.job_id.clone(),
            state: self.state,
            created_at: self.created_at.clone(),
            elapsed_seconds: elapsed,
            retries: self.retries,
            result: self.result.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind.clone(),
        }
    }
}

struct Inner {
    jobs: Mutex<BTreeMap<String, Job>>,
    next_seq: AtomicU64,
    queue_tx: mpsc::UnboundedSender<String>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Handle to the background queue; clones share the same worker.
#[derive(Clone)]
pub struct BackgroundIndexer {
    inner: Arc<Inner>,
}

impl BackgroundIndexer {
    /// Spawn the worker task. It owns clones of the store, config, and
    /// embedder, so the queue has no lifetime ties to its creator.
    pub fn spawn(store: Store, config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<String>();

        let inner = Arc::new(Inner {
            jobs: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            queue_tx,
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            worker: Mutex::new(None),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            loop {
                if worker_inner.shutdown.load(Ordering::SeqCst) {
                    while let Ok(job_id) = queue_rx.try_recv() {
                        fail_if_queued(&worker_inner, &job_id);
                    }
                    break;
                }
                tokio::select! {
                    maybe_id = queue_rx.recv() => match maybe_id {
                        None => break,
                        Some(job_id) => {
                            run_job(&worker_inner, &job_id, &store, &config, embedder.as_ref())
                                .await;
                        }
                    },
                    _ = worker_inner.shutdown_notify.notified() => {}
                }
            }
        });
        *inner.worker.lock().unwrap() = Some(handle);

        Self { inner }
    }

    /// Enqueue a reindex job and return its id immediately.
    pub fn submit(&self, request: ReindexRequest) -> Result<String> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Internal(
                "background indexer is shut down".to_string(),
            ));
        }

        let hex = uuid::Uuid::new_v4().simple().to_string();
        let job_id = hex[..12].to_string();
        let job = Job {
            job_id: job_id.clone(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
            state: JobState::Queued,
            request,
            created_at: chrono::Utc::now().to_rfc3339(),
            started: None,
            finished: None,
            retries: 0,
            result: None,
            error: None,
            error_kind: None,
        };

        {
            let mut jobs = self.inner.jobs.lock().unwrap();
            jobs.insert(job_id.clone(), job);
        }
        self.inner
            .queue_tx
            .send(job_id.clone())
            .map_err(|_| Error::Internal("background worker is gone".to_string()))?;

        debug!(job_id = %job_id, "background job queued");
        Ok(job_id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.inner.jobs.lock().unwrap().get(job_id).map(Job::snapshot)
    }

    /// All job snapshots, oldest submission first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.inner.jobs.lock().unwrap();
        let mut ordered: Vec<&Job> = jobs.values().collect();
        ordered.sort_by_key(|job| job.seq);
        ordered.into_iter().map(Job::snapshot).collect()
    }

    /// Return the id of a queued/running/waiting job covering the same path
    /// set, if any. The watcher uses this to drop redundant batches.
    pub fn find_active(&self, request: &ReindexRequest) -> Option<String> {
        let key = request.path_key();
        let jobs = self.inner.jobs.lock().unwrap();
        jobs.values()
            .find(|job| {
                matches!(
                    job.state,
                    JobState::Queued | JobState::Running | JobState::RetryWait
                ) && job.request.path_key() == key
            })
            .map(|job| job.job_id.clone())
    }

    /// Reject new submissions, cancel queued jobs, wait (bounded) for the
    /// running job. Safe to call more than once.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_notify.notify_waiters();

        {
            let mut jobs = self.inner.jobs.lock().unwrap();
            for job in jobs.values_mut() {
                if job.state == JobState::Queued {
                    job.state = JobState::Failed;
                    job.error = Some("cancelled: shutdown".to_string());
                    job.error_kind = Some("shutdown".to_string());
                    job.finished = Some(Instant::now());
                }
            }
        }

        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            // The worker exits at its next loop turn; a running job is
            // allowed to finish, bounded by the caller's timeout.
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("background worker did not drain within shutdown timeout");
            }
        }
    }
}

fn fail_if_queued(inner: &Inner, job_id: &str) {
    let mut jobs = inner.jobs.lock().unwrap();
    if let Some(job) = jobs.get_mut(job_id) {
        if job.state == JobState::Queued {
            job.state = JobState::Failed;
            job.error = Some("cancelled: shutdown".to_string());
            job.error_kind = Some("shutdown".to_string());
            job.finished = Some(Instant::now());
        }
    }
}

async fn run_job(inner: &Inner, job_id: &str, store: &Store, config: &Config, embedder: &dyn Embedder) {
    let request = {
        let mut jobs = inner.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.state != JobState::Queued {
            return;
        }
        job.state = JobState::Running;
        job.started = Some(Instant::now());
        job.request.clone()
    };

    debug!(job_id = %job_id, paths = request.paths.len(), "background job running");

    let mut attempt: u32 = 0;
    loop {
        let outcome = execute(store, config, embedder, &request).await;
        match outcome {
            Ok(report) => {
                let mut jobs = inner.jobs.lock().unwrap();
                if let Some(job) = jobs.get_mut(job_id) {
                    job.state = JobState::Completed;
                    job.result = Some(report);
                    job.retries = attempt;
                    job.finished = Some(Instant::now());
                }
                debug!(job_id = %job_id, attempts = attempt + 1, "background job completed");
                return;
            }
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = BASE_BACKOFF * 2u32.pow(attempt - 1);
                warn!(
                    job_id = %job_id,
                    attempt,
                    max = MAX_RETRIES,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "background job transient error, retrying"
                );
                {
                    let mut jobs = inner.jobs.lock().unwrap();
                    if let Some(job) = jobs.get_mut(job_id) {
                        job.state = JobState::RetryWait;
                        job.retries = attempt;
                    }
                }

                // Interruptible backoff: shutdown cancels the wait.
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = inner.shutdown_notify.notified() => {
                        let mut jobs = inner.jobs.lock().unwrap();
                        if let Some(job) = jobs.get_mut(job_id) {
                            job.state = JobState::Failed;
                            job.error = Some("cancelled: shutdown during retry".to_string());
                            job.error_kind = Some("shutdown".to_string());
                            job.finished = Some(Instant::now());
                        }
                        return;
                    }
                }

                if inner.shutdown.load(Ordering::SeqCst) {
                    let mut jobs = inner.jobs.lock().unwrap();
                    if let Some(job) = jobs.get_mut(job_id) {
                        job.state = JobState::Failed;
                        job.error = Some("cancelled: shutdown during retry".to_string());
                        job.error_kind = Some("shutdown".to_string());
                        job.finished = Some(Instant::now());
                    }
                    return;
                }

                let mut jobs = inner.jobs.lock().unwrap();
                if let Some(job) = jobs.get_mut(job_id) {
                    job.state = JobState::Running;
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, attempts = attempt + 1, error = %e, "background job failed");
                let mut jobs = inner.jobs.lock().unwrap();
                if let Some(job) = jobs.get_mut(job_id) {
                    job.state = JobState::Failed;
                    job.error = Some(e.to_string());
                    job.error_kind = Some(e.kind().to_string());
                    job.retries = attempt;
                    job.finished = Some(Instant::now());
                }
                return;
            }
        }
    }
}

async fn execute(
    store: &Store,
    config: &Config,
    embedder: &dyn Embedder,
    request: &ReindexRequest,
) -> Result<ReindexReport> {
    let indexer = Indexer::new(store, embedder, config)?;
    indexer
        .reindex(
            &request.paths,
            ReindexOptions {
                force: request.force,
                prune_missing: request.prune_missing,
            },
        )
        .await
}
