//! Embedding backends and vector utilities.
//!
//! The [`Embedder`] trait is the only thing the indexer and search service
//! know about. Two backends exist:
//!
//! - **hash** — a deterministic keyed token hash projected into a fixed-dim
//!   unit vector. No model files, no network, identical output everywhere;
//!   this is what keeps the engine fully functional offline and in CI.
//! - **onnx** — local model inference via fastembed, behind the
//!   `onnx-embeddings` cargo feature. Initialization failure falls back to
//!   the hash backend, and the downgrade is visible in the model label.
//!
//! All stored and query vectors are force-fit to the configured dimension
//! (truncate or zero-pad) and L2-normalized, at index time and query time
//! alike — applying the policy on only one side silently degrades retrieval.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

pub trait Embedder: Send + Sync {
    /// Label persisted in index metadata, e.g. `hash-384` or
    /// `onnx-BAAI-bge-small-en-v1.5-384`.
    fn model_label(&self) -> &str;

    fn dim(&self) -> usize;

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query. `None` means the query embedding could not be
    /// produced; semantic retrieval then degrades to an empty candidate list.
    fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_documents(std::slice::from_ref(&text.to_string()))
            .ok()
            .and_then(|mut vectors| {
                if vectors.is_empty() {
                    None
                } else {
                    Some(vectors.swap_remove(0))
                }
            })
    }
}

/// Select the backend for the given configuration. Never fails: `onnx` and
/// `auto` downgrade to the hash backend when local inference is unavailable.
pub fn resolve_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match config.backend.as_str() {
        "hash" => Arc::new(HashEmbedder::new(config.dim)),
        _ => match try_onnx_embedder(config) {
            Some(embedder) => embedder,
            None => {
                warn!(
                    model = %config.model,
                    "local inference backend unavailable, falling back to hash embeddings"
                );
                Arc::new(HashEmbedder::new(config.dim))
            }
        },
    }
}

// ============ Hash backend ============

/// Deterministic token-hash embedder.
///
/// Each token contributes a signed weight at an index derived from its
/// SHA-256 digest; the accumulated vector is L2-normalized. The same input
/// always yields the same vector for a given dimension.
pub struct HashEmbedder {
    dim: usize,
    label: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            label: format!("hash-{dim}"),
        }
    }
}

impl Embedder for HashEmbedder {
    fn model_label(&self) -> &str {
        &self.label
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dim)).collect())
    }
}

/// Project `text` into a `dim`-dimensional unit vector via token hashing.
pub fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dim];
    let lowered = text.to_lowercase();
    let mut any = false;

    for token in tokenize(&lowered) {
        let digest = Sha256::digest(token.as_bytes());
        let index =
            u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % dim;
        let sign = if digest[4] & 1 == 1 { -1.0 } else { 1.0 };
        let weight = 1.0 + digest[5] as f32 / 255.0;
        vec[index] += sign * weight;
        any = true;
    }

    if !any {
        return vec;
    }
    l2_normalize(&mut vec);
    vec
}

/// Token alphabet: ASCII alphanumerics plus `_ . / -`, matching how file
/// paths and identifiers appear in technical notes.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')))
        .filter(|t| !t.is_empty())
}

// ============ ONNX backend (feature-gated) ============

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use std::sync::Mutex;

    use super::{normalize_dim, Embedder, Error, Result};
    use crate::config::EmbeddingConfig;

    /// Local model inference via fastembed. The runtime wants `&mut self`
    /// for batching, so the model sits behind a mutex; the indexer is the
    /// only writer-path caller and queries embed one text at a time.
    pub struct OnnxEmbedder {
        model: Mutex<fastembed::TextEmbedding>,
        dim: usize,
        label: String,
    }

    impl OnnxEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let which = model_by_name(&config.model).ok_or_else(|| {
                Error::EmbedderUnavailable(format!("unknown local model: {}", config.model))
            })?;
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(which).with_show_download_progress(false),
            )
            .map_err(|e| {
                Error::EmbedderUnavailable(format!("failed to initialize local model: {e}"))
            })?;

            let label = format!("onnx-{}-{}", config.model.replace('/', "-"), config.dim);
            Ok(Self {
                model: Mutex::new(model),
                dim: config.dim,
                label,
            })
        }
    }

    impl Embedder for OnnxEmbedder {
        fn model_label(&self) -> &str {
            &self.label
        }

        fn dim(&self) -> usize {
            self.dim
        }

        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| Error::Internal("embedding model lock poisoned".to_string()))?;
            let raw = model
                .embed(texts.to_vec(), None)
                .map_err(|e| Error::EmbedderUnavailable(format!("local embedding failed: {e}")))?;
            Ok(raw
                .into_iter()
                .map(|mut v| {
                    normalize_dim(&mut v, self.dim);
                    v
                })
                .collect())
        }
    }

    fn model_by_name(name: &str) -> Option<fastembed::EmbeddingModel> {
        match name {
            "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => {
                Some(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => {
                Some(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => {
                Some(fastembed::EmbeddingModel::BGELargeENV15)
            }
            "all-minilm-l6-v2" => Some(fastembed::EmbeddingModel::AllMiniLML6V2),
            "nomic-embed-text-v1.5" => Some(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Some(fastembed::EmbeddingModel::MultilingualE5Small),
            _ => None,
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
fn try_onnx_embedder(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    match onnx::OnnxEmbedder::new(config) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            warn!(error = %e, "onnx backend initialization failed");
            None
        }
    }
}

#[cfg(not(feature = "onnx-embeddings"))]
fn try_onnx_embedder(_config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    None
}

// ============ Vector utilities ============

/// Force-fit a vector to `dim` (truncate or zero-pad), then L2-normalize.
pub fn normalize_dim(vec: &mut Vec<f32>, dim: usize) {
    vec.resize(dim, 0.0);
    l2_normalize(vec);
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity. Returns `0.0` for empty vectors, mismatched
/// dimensions, or a zero-norm operand — never an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embed_is_deterministic() {
        let a = hash_embed("retrieval augmented generation", 384);
        let b = hash_embed("retrieval augmented generation", 384);
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn hash_embed_is_unit_length() {
        let v = hash_embed("some note about sqlite wal mode", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embed_empty_input_is_zero_vector() {
        let v = hash_embed("!!! ???", 64);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn hash_embed_distinguishes_texts() {
        let a = hash_embed("alpha", 256);
        let b = hash_embed("omega", 256);
        assert_ne!(a, b);
    }

    #[test]
    fn embedder_trait_query_path() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.model_label(), "hash-64");
        assert_eq!(embedder.dim(), 64);
        let q = embedder.embed_query("hello world").unwrap();
        assert_eq!(q, hash_embed("hello world", 64));
    }

    #[test]
    fn normalize_dim_truncates_and_pads() {
        let mut long = vec![3.0, 4.0, 5.0, 6.0];
        normalize_dim(&mut long, 2);
        assert_eq!(long.len(), 2);
        let norm: f32 = long.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        let mut short = vec![1.0];
        normalize_dim(&mut short, 4);
        assert_eq!(short, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn blob_round_trip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
        assert_eq!(vec_to_blob(&vec).len(), 20);
    }

    #[test]
    fn cosine_identical_and_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_guards_mismatch_and_zero_norm() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn resolve_hash_backend() {
        let config = crate::config::EmbeddingConfig {
            backend: "hash".to_string(),
            model: "BAAI/bge-small-en-v1.5".to_string(),
            dim: 32,
        };
        let embedder = resolve_embedder(&config);
        assert_eq!(embedder.model_label(), "hash-32");
        assert_eq!(embedder.dim(), 32);
    }

    #[cfg(not(feature = "onnx-embeddings"))]
    #[test]
    fn auto_falls_back_to_hash_without_feature() {
        let config = crate::config::EmbeddingConfig::default();
        let embedder = resolve_embedder(&config);
        assert_eq!(embedder.model_label(), "hash-384");
    }
}
