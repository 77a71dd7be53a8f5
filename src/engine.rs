//! The engine aggregate: one constructed instance owns the pool, the
//! embedder, the background worker, and the (lazily started) file watcher.
//!
//! Lifecycle is `init → serve → shutdown`. Shutdown stops the watcher,
//! drains the background worker, and closes the pool, on every exit path.
//! All tool-level operations — search, reindex, lookups, status — live here
//! so the CLI and the HTTP server stay thin.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::background::{BackgroundIndexer, JobSnapshot, ReindexRequest};
use crate::config::Config;
use crate::db;
use crate::embedding::{resolve_embedder, Embedder};
use crate::error::{Error, Result};
use crate::indexer::{build_globset, Indexer, ReindexOptions};
use crate::migrate;
use crate::models::{ChunkDetail, FileChunks, ReindexReport, SearchMode, SearchResult};
use crate::search::{SearchService, DEFAULT_TOP_K};
use crate::store::Store;
use crate::watcher::{spawn_watcher, WatcherHandle, WatcherStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub count: usize,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_reindex: Option<AutoReindexNote>,
    pub results: Vec<SearchResult>,
}

/// What the auto-reindex hook did for this search, if it is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct AutoReindexNote {
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub files: i64,
    pub chunks: i64,
    pub embeddings: i64,
    pub db_path: String,
    pub embedding_backend: String,
    pub embedding_model: String,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_fingerprint: Option<serde_json::Value>,
    pub background_jobs: Vec<JobSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherStatus>,
}

pub struct Engine {
    config: Config,
    store: Store,
    embedder: Arc<dyn Embedder>,
    background: BackgroundIndexer,
    watcher: Mutex<Option<WatcherHandle>>,
    last_auto_reindex: Mutex<Option<Instant>>,
}

impl Engine {
    /// Connect, migrate, resolve the embedder, and start the background
    /// worker. The watcher is not started here — it lazily starts on the
    /// first search after being enabled.
    pub async fn init(config: Config) -> Result<Arc<Engine>> {
        crate::config::validate(&config)?;

        let pool = db::connect(&config.db_path).await?;
        migrate::run_migrations(&pool).await?;

        let store = Store::new(pool);
        let embedder = resolve_embedder(&config.embedding);
        info!(
            db = %config.db_path.display(),
            model = embedder.model_label(),
            "engine initialized"
        );

        let background =
            BackgroundIndexer::spawn(store.clone(), config.clone(), Arc::clone(&embedder));

        Ok(Arc::new(Engine {
            config,
            store,
            embedder,
            background,
            watcher: Mutex::new(None),
            last_auto_reindex: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn background(&self) -> &BackgroundIndexer {
        &self.background
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    // -- search --------------------------------------------------------------

    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        mode: SearchMode,
    ) -> Result<SearchResponse> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);

        self.ensure_watcher_started();
        let auto_reindex = self.maybe_auto_reindex();

        let service = SearchService::new(
            &self.store,
            self.embedder.as_ref(),
            self.config.retrieval.rrf_k,
            self.config.retrieval.candidate_factor,
        );
        let results = service.search(query, top_k, mode).await?;

        Ok(SearchResponse {
            query: query.to_string(),
            mode,
            count: results.len(),
            embedding_model: self.embedder.model_label().to_string(),
            auto_reindex,
            results,
        })
    }

    // -- indexing ------------------------------------------------------------

    /// Synchronous reindex: runs in the caller's task and returns the report.
    pub async fn reindex(
        &self,
        paths: Vec<PathBuf>,
        force: bool,
        prune_missing: bool,
    ) -> Result<ReindexReport> {
        let indexer = Indexer::new(&self.store, self.embedder.as_ref(), &self.config)?;
        indexer
            .reindex(
                &paths,
                ReindexOptions {
                    force,
                    prune_missing,
                },
            )
            .await
    }

    /// Queue a reindex on the background worker and return the job snapshot.
    pub fn reindex_background(
        &self,
        paths: Vec<PathBuf>,
        force: bool,
        prune_missing: bool,
    ) -> Result<JobSnapshot> {
        let job_id = self.background.submit(ReindexRequest {
            paths,
            force,
            prune_missing,
        })?;
        self.background
            .status(&job_id)
            .ok_or_else(|| Error::Internal("submitted job vanished".to_string()))
    }

    // -- lookups -------------------------------------------------------------

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkDetail> {
        self.store.get_chunk(chunk_id).await
    }

    pub async fn get_file(&self, path: &str) -> Result<FileChunks> {
        self.store.get_file(path).await
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let counts = self.store.counts().await?;
        let fingerprint = self
            .store
            .get_metadata("git_fingerprint")
            .await?
            .and_then(|raw| serde_json::from_str(&raw).ok());
        let watcher = self.watcher.lock().unwrap().as_ref().map(|w| w.status());

        Ok(StatusResponse {
            files: counts.files,
            chunks: counts.chunks,
            embeddings: counts.embeddings,
            db_path: self.config.db_path.display().to_string(),
            embedding_backend: self.config.embedding.backend.clone(),
            embedding_model: self.embedder.model_label().to_string(),
            include_globs: self.config.index.include_globs.clone(),
            exclude_globs: self.config.index.exclude_globs.clone(),
            git_fingerprint: fingerprint,
            background_jobs: self.background.list(),
            watcher,
        })
    }

    // -- lifecycle -----------------------------------------------------------

    /// Stop the watcher, drain the background worker, release the pool.
    pub async fn shutdown(&self, timeout: Duration) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.stop();
        }
        self.background.shutdown(timeout).await;
        self.store.pool().close().await;
        info!("engine shut down");
    }

    // -- internals -----------------------------------------------------------

    /// Lazy start: the watcher comes up on the first search after it is
    /// enabled, not at process start.
    fn ensure_watcher_started(&self) {
        if !self.config.watcher.enabled {
            return;
        }
        let mut guard = self.watcher.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let include = build_globset(&self.config.index.include_globs);
        let exclude = build_globset(&self.config.index.exclude_globs);
        let (Ok(include), Ok(exclude)) = (include, exclude) else {
            return;
        };

        match spawn_watcher(
            self.background.clone(),
            self.config.watcher.paths.clone(),
            include,
            exclude,
            Duration::from_millis(self.config.watcher.debounce_ms),
            self.config.watcher.max_crash_restarts,
        ) {
            Ok(handle) => *guard = Some(handle),
            Err(e) => debug!(error = %e, "file watcher failed to start"),
        }
    }

    /// Throttled auto-reindex hook: at most one background job per
    /// `min_interval_seconds`, claimed before submission so concurrent
    /// searches cannot stampede.
    fn maybe_auto_reindex(&self) -> Option<AutoReindexNote> {
        if !self.config.auto_reindex.enabled {
            return None;
        }

        let min_interval = Duration::from_secs_f64(
            self.config.auto_reindex.min_interval_seconds.max(0.0),
        );
        {
            let mut last = self.last_auto_reindex.lock().unwrap();
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < min_interval {
                    return Some(AutoReindexNote {
                        scheduled: false,
                        job_id: None,
                        reason: Some("throttled".to_string()),
                    });
                }
            }
            *last = Some(now);
        }

        let request = ReindexRequest {
            paths: self.config.auto_reindex.paths.clone(),
            force: false,
            prune_missing: false,
        };
        if let Some(job_id) = self.background.find_active(&request) {
            return Some(AutoReindexNote {
                scheduled: false,
                job_id: Some(job_id),
                reason: Some("already running".to_string()),
            });
        }

        match self.background.submit(request) {
            Ok(job_id) => {
                debug!(job_id = %job_id, "auto-reindex scheduled");
                Some(AutoReindexNote {
                    scheduled: true,
                    job_id: Some(job_id),
                    reason: None,
                })
            }
            Err(e) => Some(AutoReindexNote {
                scheduled: false,
                job_id: None,
                reason: Some(e.to_string()),
            }),
        }
    }
}
