//! Hybrid search ranking engine.
//!
//! A request fans out to the semantic and keyword retrievers, their rankings
//! are merged with Reciprocal Rank Fusion, filtered by threshold, truncated
//! to the limit and joined back to bookmark metadata.
//!
//! - `lexical`: keyword/category scoring and the keyword retriever
//! - `fusion`: RRF and threshold filtering (pure)
//! - `enrich`: metadata join preserving fused order
//! - `orchestrator`: validation, mode dispatch, concurrent fan-out

pub mod enrich;
pub mod errors;
pub mod fusion;
pub mod lexical;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use enrich::CandidateEnricher;
pub use errors::{RetrievalError, SearchError};
pub use lexical::{KeywordHit, KeywordRetriever, KeywordSource, LexicalIndex};
pub use orchestrator::QueryOrchestrator;

/// Which retrievers serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Semantic,
    Keyword,
}

impl SearchMode {
    pub fn uses_semantic(self) -> bool {
        match self {
            SearchMode::Hybrid | SearchMode::Semantic => true,
            SearchMode::Keyword => false,
        }
    }

    pub fn uses_keyword(self) -> bool {
        match self {
            SearchMode::Hybrid | SearchMode::Keyword => true,
            SearchMode::Semantic => false,
        }
    }
}

/// A validated search request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    text: String,
    mode: SearchMode,
    limit: usize,
    threshold: f64,
}

impl SearchQuery {
    pub fn new(
        text: impl Into<String>,
        mode: SearchMode,
        limit: i64,
        threshold: f64,
    ) -> Result<Self, SearchError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        if limit <= 0 {
            return Err(SearchError::InvalidQuery(format!(
                "limit must be a positive integer, got {limit}"
            )));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::InvalidQuery(format!(
                "threshold must be between 0 and 1, got {threshold}"
            )));
        }

        let limit = usize::try_from(limit)
            .map_err(|_| SearchError::InvalidQuery(format!("limit {limit} is too large")))?;

        Ok(Self {
            text,
            mode,
            limit,
            threshold,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// One entry of a single retriever's ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub id: u64,
    /// 1-based position in the retriever's ordering
    pub rank: usize,
    /// Retriever-specific scale, not comparable across retrievers
    pub score: f32,
    /// Category names behind a keyword hit; empty for semantic hits
    pub matched_categories: Vec<String>,
}

/// A candidate after rank fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    pub id: u64,
    /// Raw similarity, 0 when the semantic path didn't return it
    pub semantic_score: f32,
    /// Raw keyword/category score, 0 when the keyword path didn't return it
    pub category_score: f32,
    pub rrf_score: f64,
    pub matched_categories: Vec<String>,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

/// A fused result joined with bookmark metadata, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub favicon_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub semantic_score: f32,
    pub category_score: f32,
    pub rrf_score: f64,
    pub matched_categories: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Set when hybrid mode lost one retriever and answered from the other
    pub partial: bool,
}
