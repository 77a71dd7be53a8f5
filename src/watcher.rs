//! Debounced filesystem watcher feeding the background indexer.
//!
//! Raw notify events stream into a channel; the watch loop collapses every
//! event inside the debounce window (default 500 ms) into one batch, filters
//! it through the include/exclude globs, and submits a single reindex job
//! covering the watched paths. A batch is dropped when an equivalent job is
//! already queued or running, so event bursts cannot amplify into job storms.
//!
//! A supervisor restarts the watch loop on crash with exponential backoff
//! and gives up after `max_crash_restarts` consecutive failures, leaving the
//! watcher in a reported `stopped` state.

use globset::GlobSet;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::background::{BackgroundIndexer, ReindexRequest};
use crate::error::{Error, Result};

const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub running: bool,
    pub watch_paths: Vec<String>,
    pub debounce_ms: u64,
    pub events_seen: u64,
    pub jobs_submitted: u64,
    pub batches_coalesced: u64,
    pub crash_restarts: u32,
}

struct Shared {
    running: AtomicBool,
    stop: Notify,
    stopped: AtomicBool,
    events_seen: AtomicU64,
    jobs_submitted: AtomicU64,
    batches_coalesced: AtomicU64,
    crash_restarts: AtomicU32,
}

/// Handle to a running (or crashed-and-stopped) watcher.
#[derive(Clone)]
pub struct WatcherHandle {
    shared: Arc<Shared>,
    watch_paths: Vec<PathBuf>,
    debounce: Duration,
}

impl WatcherHandle {
    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            running: self.shared.running.load(Ordering::SeqCst),
            watch_paths: self
                .watch_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            debounce_ms: self.debounce.as_millis() as u64,
            events_seen: self.shared.events_seen.load(Ordering::SeqCst),
            jobs_submitted: self.shared.jobs_submitted.load(Ordering::SeqCst),
            batches_coalesced: self.shared.batches_coalesced.load(Ordering::SeqCst),
            crash_restarts: self.shared.crash_restarts.load(Ordering::SeqCst),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Signal the watch loop to stop; the notify subscription drops with it.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.stop.notify_waiters();
    }
}

/// Start watching `paths` and submit debounced reindex jobs to `background`.
pub fn spawn_watcher(
    background: BackgroundIndexer,
    paths: Vec<PathBuf>,
    include: GlobSet,
    exclude: GlobSet,
    debounce: Duration,
    max_crash_restarts: u32,
) -> Result<WatcherHandle> {
    if paths.is_empty() {
        return Err(Error::InvalidInput(
            "watcher needs at least one path".to_string(),
        ));
    }
    let watch_paths: Vec<PathBuf> = paths
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let shared = Arc::new(Shared {
        running: AtomicBool::new(true),
        stop: Notify::new(),
        stopped: AtomicBool::new(false),
        events_seen: AtomicU64::new(0),
        jobs_submitted: AtomicU64::new(0),
        batches_coalesced: AtomicU64::new(0),
        crash_restarts: AtomicU32::new(0),
    });

    let handle = WatcherHandle {
        shared: Arc::clone(&shared),
        watch_paths: watch_paths.clone(),
        debounce,
    };

    info!(
        paths = ?handle.status().watch_paths,
        debounce_ms = debounce.as_millis() as u64,
        "file watcher starting"
    );

    tokio::spawn(supervise(
        shared,
        background,
        watch_paths,
        include,
        exclude,
        debounce,
        max_crash_restarts,
    ));

    Ok(handle)
}

/// Restart the watch loop on crash with exponential backoff; give up after
/// too many consecutive failures.
async fn supervise(
    shared: Arc<Shared>,
    background: BackgroundIndexer,
    watch_paths: Vec<PathBuf>,
    include: GlobSet,
    exclude: GlobSet,
    debounce: Duration,
    max_crash_restarts: u32,
) {
    let consecutive_crashes = AtomicU32::new(0);

    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        let result = watch_loop(
            &shared,
            &background,
            &watch_paths,
            &include,
            &exclude,
            debounce,
            &consecutive_crashes,
        )
        .await;

        match result {
            Ok(()) => break,
            Err(e) => {
                let crashes = consecutive_crashes.fetch_add(1, Ordering::SeqCst) + 1;
                shared.crash_restarts.fetch_add(1, Ordering::SeqCst);
                if crashes > max_crash_restarts {
                    warn!(
                        crashes,
                        "file watcher exceeded crash restart limit, giving up"
                    );
                    break;
                }
                let delay = RESTART_BACKOFF_BASE * 2u32.pow(crashes - 1);
                warn!(
                    crashes,
                    max = max_crash_restarts,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "file watcher crashed, restarting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.stop.notified() => break,
                }
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    info!("file watcher stopped");
}

async fn watch_loop(
    shared: &Shared,
    background: &BackgroundIndexer,
    watch_paths: &[PathBuf],
    include: &GlobSet,
    exclude: &GlobSet,
    debounce: Duration,
    consecutive_crashes: &AtomicU32,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();

    // The callback runs on notify's own thread; an unbounded send is the
    // non-blocking bridge into the async side.
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if is_relevant_kind(&event.kind) {
                    for path in event.paths {
                        let _ = event_tx.send(path);
                    }
                }
            }
        })
        .map_err(|e| Error::Internal(format!("failed to create watcher: {e}")))?;

    for path in watch_paths {
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| Error::Internal(format!("failed to watch {}: {e}", path.display())))?;
    }

    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Wait for the first event of a batch (or a stop signal).
        let first = tokio::select! {
            _ = shared.stop.notified() => return Ok(()),
            maybe = event_rx.recv() => match maybe {
                Some(path) => path,
                None => return Err(Error::Internal("watcher event channel closed".to_string())),
            },
        };

        // Collapse everything that arrives inside the debounce window.
        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + debounce;
        loop {
            tokio::select! {
                _ = shared.stop.notified() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => break,
                maybe = event_rx.recv() => match maybe {
                    Some(path) => batch.push(path),
                    None => break,
                },
            }
        }

        let relevant = batch
            .iter()
            .filter(|path| matches_globs(path, include, exclude))
            .count() as u64;
        shared.events_seen.fetch_add(relevant, Ordering::SeqCst);
        if relevant == 0 {
            continue;
        }

        debug!(changes = relevant, "file watcher batch");

        // One job covers all watched paths; matching in-flight work wins.
        let request = ReindexRequest {
            paths: watch_paths.to_vec(),
            force: false,
            prune_missing: true,
        };
        if background.find_active(&request).is_some() {
            shared.batches_coalesced.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        match background.submit(request) {
            Ok(job_id) => {
                shared.jobs_submitted.fetch_add(1, Ordering::SeqCst);
                consecutive_crashes.store(0, Ordering::SeqCst);
                debug!(job_id = %job_id, "file watcher submitted reindex job");
            }
            Err(e) => {
                // Submission fails only at shutdown; stop watching.
                debug!(error = %e, "file watcher could not submit job, stopping");
                return Ok(());
            }
        }
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// A changed file is relevant when its name or full path matches an include
/// glob and neither matches an exclude glob.
fn matches_globs(path: &Path, include: &GlobSet, exclude: &GlobSet) -> bool {
    let full = path.to_string_lossy();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let included = include.is_match(full.as_ref()) || include.is_match(&name);
    if !included {
        return false;
    }
    !(exclude.is_match(full.as_ref()) || exclude.is_match(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::build_globset;

    #[test]
    fn glob_filter_matches_markdown_only() {
        let include = build_globset(&["*.md".to_string()]).unwrap();
        let exclude = build_globset(&["**/.git/**".to_string()]).unwrap();

        assert!(matches_globs(Path::new("/w/docs/a.md"), &include, &exclude));
        assert!(!matches_globs(Path::new("/w/docs/a.txt"), &include, &exclude));
        assert!(!matches_globs(Path::new("/w/.git/a.md"), &include, &exclude));
    }

    #[test]
    fn relevant_kinds_are_mutations() {
        assert!(is_relevant_kind(&EventKind::Create(
            notify::event::CreateKind::File
        )));
        assert!(is_relevant_kind(&EventKind::Remove(
            notify::event::RemoveKind::File
        )));
        assert!(!is_relevant_kind(&EventKind::Access(
            notify::event::AccessKind::Read
        )));
    }
}
