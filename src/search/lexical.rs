//! Keyword and category scoring.
//!
//! Query terms are matched against title, description, summary, tags and
//! category names. Description and summary matches are weighted inversely
//! to text length so long texts don't win on surface area alone. Category
//! matches carry the highest weight and are reported back per hit.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::bookmarks::{Bookmark, BookmarkStore};
use crate::config::KeywordConfig;
use crate::search::{RankedCandidate, RetrievalError};
use crate::semantic::IndexError;

/// Result of lexical scoring.
#[derive(Debug, Clone)]
pub struct LexicalResult {
    pub id: u64,
    /// Number of distinct query terms matched
    pub matched_terms: usize,
    /// Weighted score across all fields (length-normalized)
    pub total_hits: f32,
    /// Matched category names, in the bookmark's own order
    pub matched_categories: Vec<String>,
    created_at: DateTime<Utc>,
}

/// A keyword match as reported by a `KeywordSource`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub id: u64,
    pub score: f32,
    pub matched_categories: Vec<String>,
}

/// Text match scoped to one owner.
pub trait KeywordSource: Send + Sync {
    /// Up to `k` matches, best first. Ties are ordered newest first, then by id.
    fn match_text(&self, query: &str, owner: &str, k: usize)
        -> Result<Vec<KeywordHit>, IndexError>;
}

/// Scans an owner's bookmarks from the store on every query.
pub struct LexicalIndex {
    store: Arc<dyn BookmarkStore>,
    weights: KeywordConfig,
}

impl LexicalIndex {
    pub fn new(store: Arc<dyn BookmarkStore>, weights: KeywordConfig) -> Self {
        Self { store, weights }
    }
}

impl KeywordSource for LexicalIndex {
    fn match_text(
        &self,
        query: &str,
        owner: &str,
        k: usize,
    ) -> Result<Vec<KeywordHit>, IndexError> {
        let bookmarks = self
            .store
            .list(owner)
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let mut results = score_lexical(query, &bookmarks, &self.weights);
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|r| KeywordHit {
                id: r.id,
                score: r.total_hits,
                matched_categories: r.matched_categories,
            })
            .collect())
    }
}

/// Query-time keyword retrieval over a `KeywordSource`.
pub struct KeywordRetriever {
    source: Arc<dyn KeywordSource>,
}

impl KeywordRetriever {
    pub fn new(source: Arc<dyn KeywordSource>) -> Self {
        Self { source }
    }

    /// Up to `k` of the owner's keyword matches, ranked from 1.
    pub async fn retrieve(
        &self,
        query_text: &str,
        owner: &str,
        k: usize,
    ) -> Result<Vec<RankedCandidate>, RetrievalError> {
        if k == 0 {
            return Ok(vec![]);
        }

        let source = self.source.clone();
        let query = query_text.to_string();
        let owner = owner.to_string();
        let hits =
            tokio::task::spawn_blocking(move || source.match_text(&query, &owner, k)).await??;

        log::debug!("keyword retrieval: {} candidates (k={})", hits.len(), k);

        Ok(hits
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, hit)| RankedCandidate {
                id: hit.id,
                rank: i + 1,
                score: hit.score,
                matched_categories: hit.matched_categories,
            })
            .collect())
    }
}

/// Score bookmarks against a query.
///
/// Only bookmarks with at least one match are returned, ordered by total
/// score DESC, then creation time DESC, then id ASC.
pub fn score_lexical(
    query: &str,
    bookmarks: &[Bookmark],
    weights: &KeywordConfig,
) -> Vec<LexicalResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return vec![];
    }

    let mut results: Vec<LexicalResult> = bookmarks
        .par_iter()
        .filter_map(|bmark| {
            let result = count_matches(&query_terms, bmark, weights);
            (result.matched_terms > 0).then_some(result)
        })
        .collect();

    results.sort_by(|a, b| {
        b.total_hits
            .total_cmp(&a.total_hits)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    results
}

/// Tokenize into lowercase terms.
/// Filters out very short terms (1 char) and common stop words.
fn tokenize(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at",
        "to", "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so",
        "if", "then",
    ];

    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Baseline text length for normalization (characters).
/// Texts at or below this length get full weight.
const BODY_LENGTH_BASELINE: f32 = 100.0;

/// Logarithmic decay: 1 / (1 + ln(len / baseline)).
///
/// - 100 chars or less: 1.0
/// - 270 chars: ~0.5
/// - 730 chars: ~0.33
fn body_length_weight(len: usize) -> f32 {
    if len <= BODY_LENGTH_BASELINE as usize {
        return 1.0;
    }
    1.0 / (1.0 + (len as f32 / BODY_LENGTH_BASELINE).ln())
}

fn count_matches(query_terms: &[String], bmark: &Bookmark, weights: &KeywordConfig) -> LexicalResult {
    let lower = |s: &Option<String>| s.as_deref().unwrap_or_default().to_lowercase();
    let title = lower(&bmark.title);
    let description = lower(&bmark.description);
    let summary = lower(&bmark.summary);
    let tags: Vec<String> = bmark.tags.iter().map(|t| t.to_lowercase()).collect();
    let category_terms: Vec<Vec<String>> =
        bmark.categories.iter().map(|c| tokenize(c)).collect();

    let description_weight = weights.body_weight * body_length_weight(description.chars().count());
    let summary_weight = weights.body_weight * body_length_weight(summary.chars().count());

    let mut matched_terms = 0;
    let mut total_hits: f32 = 0.0;
    let mut matched_category_idx: HashSet<usize> = HashSet::new();

    for term in query_terms {
        let mut term_hits: f32 = 0.0;

        if title.contains(term.as_str()) {
            term_hits += weights.title_weight;
        }
        if description.contains(term.as_str()) {
            term_hits += description_weight;
        }
        if summary.contains(term.as_str()) {
            term_hits += summary_weight;
        }

        // exact tag or hierarchy prefix
        let prefix = format!("{}/", term);
        for tag in &tags {
            if tag == term || tag.starts_with(&prefix) {
                term_hits += weights.tag_weight;
            }
        }

        for (idx, terms) in category_terms.iter().enumerate() {
            if terms.contains(term) {
                term_hits += weights.category_weight;
                matched_category_idx.insert(idx);
            }
        }

        if term_hits > 0.0 {
            matched_terms += 1;
            total_hits += term_hits;
        }
    }

    let matched_categories = bmark
        .categories
        .iter()
        .enumerate()
        .filter(|(idx, _)| matched_category_idx.contains(idx))
        .map(|(_, name)| name.clone())
        .collect();

    LexicalResult {
        id: bmark.id,
        matched_terms,
        total_hits,
        matched_categories,
        created_at: bmark.created_at,
    }
}
