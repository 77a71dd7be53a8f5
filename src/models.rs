//! Core data types shared across indexing and retrieval.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Stored metadata for a tracked file, used for change detection.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub id: i64,
    pub mtime_ns: i64,
    pub size_bytes: i64,
    pub sha256: String,
}

/// A chunk as produced by the chunker, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `sha256(normalized_path :: chunk_index)` as lowercase hex.
    pub chunk_id: String,
    pub chunk_index: i64,
    /// `" > "`-joined ancestor headings; empty before the first heading.
    pub heading_path: String,
    pub content: String,
    /// Whitespace-token count; advisory only.
    pub token_count: i64,
}

/// One chunk joined with its file path, as returned by lookups.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkDetail {
    pub chunk_id: String,
    pub path: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub content: String,
}

/// All chunks of one indexed file, in index order.
#[derive(Debug, Clone, Serialize)]
pub struct FileChunks {
    pub path: String,
    pub chunks: Vec<FileChunkEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileChunkEntry {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub heading_path: String,
    pub content: String,
}

/// A lexical candidate: BM25-scored FTS match with its display metadata.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub path: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub content: String,
    /// Raw FTS5 BM25 score; more negative is better.
    pub bm25: f64,
}

/// A semantic candidate: cosine-scored stored embedding.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub chunk_id: String,
    pub path: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub content: String,
    pub cosine: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "lexical" => Ok(SearchMode::Lexical),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(Error::InvalidInput(format!(
                "unknown search mode: '{other}'. Use lexical, semantic, or hybrid."
            ))),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Lexical => write!(f, "lexical"),
            SearchMode::Semantic => write!(f, "semantic"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Per-mode score detail. Untagged so each mode serializes exactly its own
/// keys: `{bm25}`, `{cosine}`, or `{rrf, lexical_rank, semantic_rank}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ScoreBreakdown {
    Lexical {
        bm25: f64,
    },
    Semantic {
        cosine: f32,
    },
    Hybrid {
        rrf: f64,
        lexical_rank: Option<u32>,
        semantic_rank: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub path: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub content: String,
    pub score_breakdown: ScoreBreakdown,
}

/// Aggregate counts returned by a reindex run.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub indexed_files: u64,
    pub skipped_files: u64,
    pub deleted_files: u64,
    pub indexed_paths: Vec<String>,
    pub embedding_model: String,
    pub embedding_backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_fingerprint: Option<crate::git::GitFingerprint>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexCounts {
    pub files: i64,
    pub chunks: i64,
    pub embeddings: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trip() {
        for (text, mode) in [
            ("lexical", SearchMode::Lexical),
            ("semantic", SearchMode::Semantic),
            ("hybrid", SearchMode::Hybrid),
        ] {
            assert_eq!(text.parse::<SearchMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), text);
        }
        assert!("keyword".parse::<SearchMode>().is_err());
    }

    #[test]
    fn breakdown_serializes_only_its_mode_keys() {
        let lexical = serde_json::to_value(ScoreBreakdown::Lexical { bm25: -1.5 }).unwrap();
        assert!(lexical.get("bm25").is_some());
        assert!(lexical.get("cosine").is_none());
        assert!(lexical.get("rrf").is_none());

        let hybrid = serde_json::to_value(ScoreBreakdown::Hybrid {
            rrf: 0.03,
            lexical_rank: Some(2),
            semantic_rank: None,
        })
        .unwrap();
        assert!(hybrid.get("rrf").is_some());
        assert_eq!(hybrid["semantic_rank"], serde_json::Value::Null);
        assert!(hybrid.get("bm25").is_none());
    }
}
