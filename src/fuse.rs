//! Reciprocal Rank Fusion of the lexical and semantic candidate lists.
//!
//! Raw BM25 and cosine values live on incomparable scales and are never
//! averaged; fusion only consumes ranks. Each chunk scores
//! `Σ 1 / (k + rank)` over the lists it appears in (ranks start at 1),
//! ties broken by lexical rank, then semantic rank, then chunk id — so a
//! chunk present in the lexical list always precedes an equal-scored chunk
//! that is not.

use std::collections::HashMap;

pub const DEFAULT_RRF_K: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    pub lexical_rank: Option<u32>,
    pub semantic_rank: Option<u32>,
}

pub fn rrf_fuse(lexical_ids: &[String], semantic_ids: &[String], k: u32) -> Vec<FusedHit> {
    let mut fused: HashMap<&str, FusedHit> = HashMap::new();

    for (i, chunk_id) in lexical_ids.iter().enumerate() {
        let rank = (i + 1) as u32;
        let entry = fused.entry(chunk_id).or_insert_with(|| FusedHit {
            chunk_id: chunk_id.clone(),
            score: 0.0,
            lexical_rank: None,
            semantic_rank: None,
        });
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(rank);
            entry.score += 1.0 / f64::from(k + rank);
        }
    }

    for (i, chunk_id) in semantic_ids.iter().enumerate() {
        let rank = (i + 1) as u32;
        let entry = fused.entry(chunk_id).or_insert_with(|| FusedHit {
            chunk_id: chunk_id.clone(),
            score: 0.0,
            lexical_rank: None,
            semantic_rank: None,
        });
        if entry.semantic_rank.is_none() {
            entry.semantic_rank = Some(rank);
            entry.score += 1.0 / f64::from(k + rank);
        }
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_key(a.lexical_rank).cmp(&rank_key(b.lexical_rank)))
            .then_with(|| rank_key(a.semantic_rank).cmp(&rank_key(b.semantic_rank)))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits
}

fn rank_key(rank: Option<u32>) -> u32 {
    rank.unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlapping_lists_fuse_by_rank() {
        let hits = rrf_fuse(&ids(&["c1", "c2"]), &ids(&["c2", "c3"]), DEFAULT_RRF_K);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c1", "c3"]);

        let c2 = &hits[0];
        assert!((c2.score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-9);
        assert_eq!(c2.lexical_rank, Some(2));
        assert_eq!(c2.semantic_rank, Some(1));

        let c1 = &hits[1];
        assert!((c1.score - 1.0 / 61.0).abs() < 1e-9);
        assert_eq!(c1.lexical_rank, Some(1));
        assert_eq!(c1.semantic_rank, None);

        let c3 = &hits[2];
        assert!((c3.score - 1.0 / 62.0).abs() < 1e-9);
        assert_eq!(c3.semantic_rank, Some(2));
        assert_eq!(c3.lexical_rank, None);
    }

    #[test]
    fn scores_strictly_descending_with_tie_break() {
        let hits = rrf_fuse(&ids(&["a", "b"]), &ids(&["c", "d"]), DEFAULT_RRF_K);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // a and c share 1/(k+1); the lexical entry wins the tie.
        assert_eq!(hits[0].chunk_id, "a");
        assert_eq!(hits[1].chunk_id, "c");
        // b and d share 1/(k+2); same rule.
        assert_eq!(hits[2].chunk_id, "b");
        assert_eq!(hits[3].chunk_id, "d");
    }

    #[test]
    fn equal_rank_in_same_list_breaks_lexicographically() {
        // Two chunks only in the semantic list can still tie when fed equal
        // ranks through duplicate suppression; synthesize via single lists.
        let hits = rrf_fuse(&[], &ids(&["z1"]), DEFAULT_RRF_K);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lexical_rank, None);

        let hits = rrf_fuse(&ids(&["m"]), &[], DEFAULT_RRF_K);
        assert_eq!(hits[0].semantic_rank, None);
        assert!((hits[0].score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_ids_within_a_list_count_once() {
        let hits = rrf_fuse(&ids(&["x", "x"]), &[], DEFAULT_RRF_K);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lexical_rank, Some(1));
        assert!((hits[0].score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        assert!(rrf_fuse(&[], &[], DEFAULT_RRF_K).is_empty());
    }
}
