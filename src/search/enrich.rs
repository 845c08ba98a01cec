use std::sync::Arc;

use crate::bookmarks::BookmarkStore;

use super::{FusedResult, SearchHit};

/// Joins ranked results with bookmark metadata in one batched lookup.
pub struct CandidateEnricher {
    store: Arc<dyn BookmarkStore>,
}

impl CandidateEnricher {
    pub fn new(store: Arc<dyn BookmarkStore>) -> Self {
        Self { store }
    }

    /// Output order equals input order. Ids the store doesn't return (deleted
    /// since indexing, or not owned by `owner`) are dropped.
    pub fn enrich(&self, ranked: Vec<FusedResult>, owner: &str) -> anyhow::Result<Vec<SearchHit>> {
        if ranked.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<u64> = ranked.iter().map(|r| r.id).collect();
        let mut bookmarks = self.store.get_by_ids(&ids, owner)?;

        let hits: Vec<SearchHit> = ranked
            .into_iter()
            .filter_map(|result| {
                let Some(bmark) = bookmarks.remove(&result.id) else {
                    log::debug!("dropping candidate {}: not in store", result.id);
                    return None;
                };
                Some(SearchHit {
                    id: bmark.id,
                    url: bmark.url,
                    title: bmark.title,
                    description: bmark.description,
                    summary: bmark.summary,
                    favicon_url: bmark.favicon_url,
                    created_at: bmark.created_at,
                    semantic_score: result.semantic_score,
                    category_score: result.category_score,
                    rrf_score: result.rrf_score,
                    matched_categories: result.matched_categories,
                })
            })
            .collect();

        Ok(hits)
    }
}
