//! Semantic candidate generation: cosine similarity over stored embeddings.

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::error::Result;
use crate::models::SemanticHit;
use crate::store::Store;

/// Score every stored embedding against the query vector and keep the top
/// `limit`. A `None` query vector (embedder unavailable) yields an empty
/// list, never an error; a stored vector of the wrong dimension scores 0.0.
pub async fn semantic_search(
    store: &Store,
    query_vector: Option<&[f32]>,
    limit: usize,
) -> Result<Vec<SemanticHit>> {
    let Some(query_vector) = query_vector else {
        return Ok(Vec::new());
    };

    let mut candidates: Vec<SemanticHit> = store
        .all_embeddings()
        .await?
        .into_iter()
        .map(|row| {
            let stored = decode_vector(&row.vec, row.dim as usize);
            let cosine = cosine_similarity(query_vector, &stored);
            SemanticHit {
                chunk_id: row.chunk_id,
                path: row.path,
                heading_path: row.heading_path,
                chunk_index: row.chunk_index,
                content: row.content,
                cosine,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.cosine
            .partial_cmp(&a.cosine)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    Ok(candidates)
}

/// Decode at most `dim` floats from the BLOB. A short blob yields a shorter
/// vector, which the cosine guard then scores as 0.0 instead of crashing.
fn decode_vector(blob: &[u8], dim: usize) -> Vec<f32> {
    let mut vec = blob_to_vec(blob);
    vec.truncate(dim);
    vec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::vec_to_blob;

    #[test]
    fn decode_respects_declared_dim() {
        let blob = vec_to_blob(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(decode_vector(&blob, 2), vec![1.0, 2.0]);
        assert_eq!(decode_vector(&blob, 4), vec![1.0, 2.0, 3.0, 4.0]);
        // A corrupt (short) blob is not padded; the cosine guard handles it.
        assert_eq!(decode_vector(&blob, 8).len(), 4);
    }
}
