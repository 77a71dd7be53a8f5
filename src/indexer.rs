//! Incremental indexing pipeline: scan → change-detect → chunk → embed →
//! persist.
//!
//! Change detection is two-tiered. The fast path compares stored
//! `(mtime_ns, size_bytes)` against the filesystem and skips matching files
//! without reading them. The slow path reads the bytes and compares SHA-256;
//! an unchanged hash refreshes only the stat columns. Only a real content
//! change (or `force`) rebuilds a file's chunks, and that rebuild commits as
//! one transaction.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};
use tracing::debug;
use walkdir::WalkDir;

use crate::chunker::{chunk_file, normalize_path, ChunkParams};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::git;
use crate::models::ReindexReport;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReindexOptions {
    /// Rebuild every matching file even when change detection would skip it.
    pub force: bool,
    /// Delete tracked files whose paths were not observed during the scan.
    pub prune_missing: bool,
}

pub struct Indexer<'a> {
    store: &'a Store,
    embedder: &'a dyn Embedder,
    params: ChunkParams,
    include: GlobSet,
    exclude: GlobSet,
    embedding_backend: String,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a Store, embedder: &'a dyn Embedder, config: &Config) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            params: ChunkParams {
                max_chunk_chars: config.chunking.max_chunk_chars,
                min_chunk_chars: config.chunking.min_chunk_chars,
            },
            include: build_globset(&config.index.include_globs)?,
            exclude: build_globset(&config.index.exclude_globs)?,
            embedding_backend: config.embedding.backend.clone(),
        })
    }

    /// Reindex one or more locations, deduplicating overlapping scans by
    /// canonical absolute path, then prune and refresh index metadata.
    pub async fn reindex(&self, roots: &[PathBuf], opts: ReindexOptions) -> Result<ReindexReport> {
        let t_start = Instant::now();
        let mut indexed: u64 = 0;
        let mut skipped: u64 = 0;
        let mut seen_paths: Vec<String> = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();

        let file_meta = self.store.get_all_file_meta().await?;

        for root in roots {
            let root = root
                .canonicalize()
                .map_err(|e| Error::InvalidInput(format!("cannot scan {}: {e}", root.display())))?;
            let source_root = if root.is_file() {
                root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
            } else {
                root.clone()
            };

            let mut candidates = collect_candidates(&root)?;
            candidates.sort();
            debug!(root = %root.display(), candidates = candidates.len(), force = opts.force, "scan");

            for file_path in candidates {
                if !visited.insert(file_path.clone()) {
                    continue;
                }

                let relative = file_path.strip_prefix(&source_root).unwrap_or(&file_path);
                let rel = normalize_path(&relative.to_string_lossy());
                if !self.include.is_match(&rel) || self.exclude.is_match(&rel) {
                    continue;
                }
                seen_paths.push(rel.clone());

                let metadata = std::fs::metadata(&file_path)?;
                let mtime_ns = mtime_nanos(&metadata);
                let size_bytes = metadata.len() as i64;
                let existing = file_meta.get(&rel);

                // Fast path: stat unchanged, skip without reading the file.
                if !opts.force {
                    if let Some(meta) = existing {
                        if meta.mtime_ns == mtime_ns && meta.size_bytes == size_bytes {
                            skipped += 1;
                            continue;
                        }
                    }
                }

                let bytes = std::fs::read(&file_path)?;
                let sha256 = format!("{:x}", Sha256::digest(&bytes));

                // Stat changed but content did not (touch, copy-replace with
                // identical bytes): refresh stats, keep chunks and embeddings.
                if !opts.force {
                    if let Some(meta) = existing {
                        if meta.sha256 == sha256 {
                            debug!(path = %rel, "skip (hash match, stat refreshed)");
                            self.store.touch_file(&rel, mtime_ns, size_bytes).await?;
                            skipped += 1;
                            continue;
                        }
                    }
                }

                let t_file = Instant::now();
                let text = String::from_utf8_lossy(&bytes);
                let chunks = chunk_file(&text, &rel, self.params);
                let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                let vectors = self.embedder.embed_documents(&texts)?;

                self.store
                    .apply_file_update(
                        &rel,
                        mtime_ns,
                        size_bytes,
                        &sha256,
                        &chunks,
                        &vectors,
                        self.embedder.model_label(),
                    )
                    .await?;

                debug!(
                    path = %rel,
                    chunks = chunks.len(),
                    elapsed_ms = t_file.elapsed().as_millis() as u64,
                    "indexed"
                );
                indexed += 1;
            }
        }

        seen_paths.sort();
        seen_paths.dedup();

        let deleted = if opts.prune_missing {
            self.store.delete_files_except(&seen_paths).await?
        } else {
            0
        };

        self.store
            .set_metadata("embedding_model", self.embedder.model_label())
            .await?;
        self.store
            .set_metadata("embedding_dim", &self.embedder.dim().to_string())
            .await?;

        let fingerprint = git::combined_fingerprint(roots);
        match &fingerprint {
            Some(fp) => {
                let json = serde_json::to_string(fp)
                    .map_err(|e| Error::Internal(format!("fingerprint encoding: {e}")))?;
                self.store.set_metadata("git_fingerprint", &json).await?;
            }
            None => self.store.delete_metadata("git_fingerprint").await?,
        }

        debug!(
            elapsed_ms = t_start.elapsed().as_millis() as u64,
            indexed, skipped, deleted, "reindex done"
        );

        Ok(ReindexReport {
            indexed_files: indexed,
            skipped_files: skipped,
            deleted_files: deleted,
            indexed_paths: roots.iter().map(|p| p.display().to_string()).collect(),
            embedding_model: self.embedder.model_label().to_string(),
            embedding_backend: self.embedding_backend.clone(),
            git_fingerprint: fingerprint,
        })
    }
}

fn collect_candidates(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::Internal(format!("walk {}: {e}", root.display())))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn mtime_nanos(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::InvalidInput(format!("bad glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(format!("glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_glob_matches_nested_paths() {
        let set = build_globset(&["*.md".to_string()]).unwrap();
        assert!(set.is_match("notes.md"));
        assert!(set.is_match("docs/deep/notes.md"));
        assert!(!set.is_match("notes.txt"));
    }

    #[test]
    fn exclude_glob_covers_vcs_dirs() {
        let set = build_globset(&["**/.git/**".to_string(), "**/node_modules/**".to_string()])
            .unwrap();
        assert!(set.is_match("repo/.git/HEAD"));
        assert!(set.is_match("a/node_modules/pkg/readme.md"));
        assert!(!set.is_match("docs/notes.md"));
    }

    #[test]
    fn bad_glob_is_invalid_input() {
        let err = build_globset(&["[".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
