//! Reciprocal Rank Fusion of the semantic and keyword rankings.
//!
//! Each list contributes `1 / (k + rank)` to every candidate it contains;
//! a candidate present in both lists gets the sum. Raw retriever scores are
//! carried along for display but never enter the fused score.

use std::collections::HashMap;

use super::{FusedResult, RankedCandidate};

/// RRF contribution of a 1-based rank.
pub fn rrf_contribution(rank: usize, k_const: f64) -> f64 {
    1.0 / (k_const + rank as f64)
}

/// Merge the two rankings into one entry per distinct id.
///
/// Either list may be empty (single-mode requests pass an empty second list).
/// Should a list repeat an id, its first (best ranked) occurrence counts.
pub fn fuse(
    semantic: &[RankedCandidate],
    keyword: &[RankedCandidate],
    k_const: f64,
) -> HashMap<u64, FusedResult> {
    let mut fused: HashMap<u64, FusedResult> =
        HashMap::with_capacity(semantic.len() + keyword.len());

    for candidate in semantic {
        let entry = fused
            .entry(candidate.id)
            .or_insert_with(|| empty_result(candidate.id));
        if entry.semantic_rank.is_some() {
            continue;
        }
        entry.semantic_rank = Some(candidate.rank);
        entry.semantic_score = candidate.score;
        entry.rrf_score += rrf_contribution(candidate.rank, k_const);
    }

    for candidate in keyword {
        let entry = fused
            .entry(candidate.id)
            .or_insert_with(|| empty_result(candidate.id));
        if entry.keyword_rank.is_some() {
            continue;
        }
        entry.keyword_rank = Some(candidate.rank);
        entry.category_score = candidate.score;
        entry.matched_categories = candidate.matched_categories.clone();
        entry.rrf_score += rrf_contribution(candidate.rank, k_const);
    }

    fused
}

fn empty_result(id: u64) -> FusedResult {
    FusedResult {
        id,
        semantic_score: 0.0,
        category_score: 0.0,
        rrf_score: 0.0,
        matched_categories: vec![],
        semantic_rank: None,
        keyword_rank: None,
    }
}

/// Drop results under `threshold`, order by descending RRF score (ties by
/// ascending id) and keep the first `limit`.
pub fn rank_results(
    fused: HashMap<u64, FusedResult>,
    threshold: f64,
    limit: usize,
) -> Vec<FusedResult> {
    let mut results: Vec<FusedResult> = fused
        .into_values()
        .filter(|r| r.rrf_score >= threshold)
        .collect();

    results.sort_by(|a, b| {
        b.rrf_score
            .total_cmp(&a.rrf_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);

    results
}
