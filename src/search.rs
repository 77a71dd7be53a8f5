//! Search service: mode dispatch, candidate oversampling, fusion, and
//! result assembly.
//!
//! Every mode returns at most `top_k` results and never raises on an empty
//! corpus, an empty query, an unavailable embedder, or modality-specific
//! emptiness — those all reduce to fewer (possibly zero) results.

use std::collections::HashMap;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::fuse::rrf_fuse;
use crate::lexical::lexical_search;
use crate::models::{ScoreBreakdown, SearchMode, SearchResult};
use crate::semantic::semantic_search;
use crate::store::Store;

pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 100;

pub struct SearchService<'a> {
    store: &'a Store,
    embedder: &'a dyn Embedder,
    rrf_k: u32,
    candidate_factor: usize,
}

impl<'a> SearchService<'a> {
    pub fn new(
        store: &'a Store,
        embedder: &'a dyn Embedder,
        rrf_k: u32,
        candidate_factor: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            rrf_k,
            candidate_factor: candidate_factor.max(1),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>> {
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(Error::InvalidInput(format!(
                "top_k must be in [1, {MAX_TOP_K}], got {top_k}"
            )));
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let candidate_limit = top_k * self.candidate_factor;

        let lexical = if matches!(mode, SearchMode::Lexical | SearchMode::Hybrid) {
            lexical_search(self.store, query, candidate_limit as i64).await?
        } else {
            Vec::new()
        };

        let semantic = if matches!(mode, SearchMode::Semantic | SearchMode::Hybrid) {
            let query_vec = self.embedder.embed_query(query);
            semantic_search(self.store, query_vec.as_deref(), candidate_limit).await?
        } else {
            Vec::new()
        };

        let results = match mode {
            SearchMode::Lexical => lexical
                .into_iter()
                .take(top_k)
                .map(|hit| SearchResult {
                    chunk_id: hit.chunk_id,
                    path: hit.path,
                    heading_path: hit.heading_path,
                    chunk_index: hit.chunk_index,
                    content: hit.content,
                    score_breakdown: ScoreBreakdown::Lexical { bm25: hit.bm25 },
                })
                .collect(),
            SearchMode::Semantic => semantic
                .into_iter()
                .take(top_k)
                .map(|hit| SearchResult {
                    chunk_id: hit.chunk_id,
                    path: hit.path,
                    heading_path: hit.heading_path,
                    chunk_index: hit.chunk_index,
                    content: hit.content,
                    score_breakdown: ScoreBreakdown::Semantic { cosine: hit.cosine },
                })
                .collect(),
            SearchMode::Hybrid => {
                let lexical_ids: Vec<String> =
                    lexical.iter().map(|h| h.chunk_id.clone()).collect();
                let semantic_ids: Vec<String> =
                    semantic.iter().map(|h| h.chunk_id.clone()).collect();
                let fused = rrf_fuse(&lexical_ids, &semantic_ids, self.rrf_k);

                // Metadata for each fused chunk comes from exactly one
                // candidate row; when a chunk appears in both lists the
                // semantic row is used, never a field mix.
                let lexical_map: HashMap<&str, &crate::models::LexicalHit> =
                    lexical.iter().map(|h| (h.chunk_id.as_str(), h)).collect();
                let semantic_map: HashMap<&str, &crate::models::SemanticHit> =
                    semantic.iter().map(|h| (h.chunk_id.as_str(), h)).collect();

                fused
                    .into_iter()
                    .take(top_k)
                    .filter_map(|hit| {
                        let breakdown = ScoreBreakdown::Hybrid {
                            rrf: hit.score,
                            lexical_rank: hit.lexical_rank,
                            semantic_rank: hit.semantic_rank,
                        };
                        if let Some(row) = semantic_map.get(hit.chunk_id.as_str()) {
                            Some(SearchResult {
                                chunk_id: hit.chunk_id,
                                path: row.path.clone(),
                                heading_path: row.heading_path.clone(),
                                chunk_index: row.chunk_index,
                                content: row.content.clone(),
                                score_breakdown: breakdown,
                            })
                        } else {
                            lexical_map.get(hit.chunk_id.as_str()).map(|row| SearchResult {
                                chunk_id: hit.chunk_id.clone(),
                                path: row.path.clone(),
                                heading_path: row.heading_path.clone(),
                                chunk_index: row.chunk_index,
                                content: row.content.clone(),
                                score_breakdown: breakdown,
                            })
                        }
                    })
                    .collect()
            }
        };

        Ok(results)
    }
}
