//! Query orchestration.
//!
//! Validates the request, dispatches it to the retrievers the mode needs
//! (concurrently in hybrid mode), fuses and thresholds the rankings and
//! enriches the survivors.
//!
//! Both retrievers run as tasks of one `JoinSet` owned by the request
//! future. Dropping that future (client disconnect, shutdown) drops the set
//! and aborts whatever is still in flight. Work already handed to the
//! blocking pool finishes on its own, but its result is discarded.
//!
//! The embedding model sits behind a mutex, so an embed that was abandoned
//! or timed out keeps the model busy until it completes. Semantic queries
//! arriving meanwhile queue behind it and may hit their own timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::config::SearchConfig;
use crate::semantic::SemanticRetriever;

use super::enrich::CandidateEnricher;
use super::errors::{RetrievalError, SearchError};
use super::fusion::{fuse, rank_results};
use super::lexical::KeywordRetriever;
use super::{RankedCandidate, SearchMode, SearchQuery, SearchResponse};

type Retrieval = Result<Vec<RankedCandidate>, RetrievalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Semantic,
    Keyword,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Semantic => write!(f, "semantic"),
            Side::Keyword => write!(f, "keyword"),
        }
    }
}

pub struct QueryOrchestrator {
    /// `None` when semantic search is disabled
    semantic: Option<Arc<SemanticRetriever>>,
    keyword: Arc<KeywordRetriever>,
    enricher: Arc<CandidateEnricher>,
    config: SearchConfig,
}

impl QueryOrchestrator {
    pub fn new(
        semantic: Option<SemanticRetriever>,
        keyword: KeywordRetriever,
        enricher: CandidateEnricher,
        config: SearchConfig,
    ) -> Self {
        Self {
            semantic: semantic.map(Arc::new),
            keyword: Arc::new(keyword),
            enricher: Arc::new(enricher),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn semantic_enabled(&self) -> bool {
        self.semantic.is_some()
    }

    /// How many candidates each retriever is asked for.
    fn candidate_k(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.config.overfetch_factor)
            .min(self.config.max_candidates)
            .max(limit)
    }

    /// Runs a search for `owner`.
    ///
    /// In hybrid mode a failed or timed out retriever degrades the response
    /// to the other retriever's results and sets `partial`. A failure of the
    /// only retriever a request depends on is `RetrievalUnavailable`.
    pub async fn search(
        &self,
        query: &SearchQuery,
        owner: &str,
    ) -> Result<SearchResponse, SearchError> {
        if query.limit() > self.config.max_limit {
            return Err(SearchError::InvalidQuery(format!(
                "limit must not exceed {}, got {}",
                self.config.max_limit,
                query.limit()
            )));
        }

        let started = Instant::now();
        let mode = query.mode();
        let k = self.candidate_k(query.limit());
        let timeout = self.config.retrieval_timeout();

        let mut semantic: Option<Retrieval> = None;
        let mut keyword: Option<Retrieval> = None;
        let mut tasks: JoinSet<(Side, Retrieval)> = JoinSet::new();

        if mode.uses_semantic() {
            match &self.semantic {
                Some(retriever) => {
                    let retriever = retriever.clone();
                    let text = query.text().to_string();
                    let owner = owner.to_string();
                    tasks.spawn(async move {
                        let result =
                            with_timeout(timeout, retriever.retrieve(&text, &owner, k)).await;
                        (Side::Semantic, result)
                    });
                }
                None => semantic = Some(Err(RetrievalError::Disabled)),
            }
        }

        if mode.uses_keyword() {
            let retriever = self.keyword.clone();
            let text = query.text().to_string();
            let owner = owner.to_string();
            tasks.spawn(async move {
                let result = with_timeout(timeout, retriever.retrieve(&text, &owner, k)).await;
                (Side::Keyword, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((Side::Semantic, result)) => semantic = Some(result),
                Ok((Side::Keyword, result)) => keyword = Some(result),
                // the slot stays empty and is reported below
                Err(err) => log::error!("retrieval task failed: {err}"),
            }
        }

        let (semantic_list, keyword_list, partial) = match mode {
            SearchMode::Semantic => (
                take(Side::Semantic, semantic).map_err(|e| unavailable(Side::Semantic, e))?,
                vec![],
                false,
            ),
            SearchMode::Keyword => (
                vec![],
                take(Side::Keyword, keyword).map_err(|e| unavailable(Side::Keyword, e))?,
                false,
            ),
            SearchMode::Hybrid => {
                match (take(Side::Semantic, semantic), take(Side::Keyword, keyword)) {
                    (Ok(s), Ok(k)) => (s, k, false),
                    (Ok(s), Err(err)) => {
                        log::warn!("keyword retrieval failed, serving semantic results only: {err}");
                        (s, vec![], true)
                    }
                    (Err(err), Ok(k)) => {
                        if matches!(err, RetrievalError::Disabled) {
                            log::debug!("semantic search disabled, serving keyword results only");
                        } else {
                            log::warn!(
                                "semantic retrieval failed, serving keyword results only: {err}"
                            );
                        }
                        (vec![], k, true)
                    }
                    (Err(semantic_err), Err(keyword_err)) => {
                        log::error!(
                            "all retrievers failed: semantic: {semantic_err}; keyword: {keyword_err}"
                        );
                        return Err(SearchError::RetrievalUnavailable(format!(
                            "semantic: {semantic_err}; keyword: {keyword_err}"
                        )));
                    }
                }
            }
        };

        let candidates = semantic_list.len() + keyword_list.len();
        let fused = fuse(&semantic_list, &keyword_list, self.config.rrf_k);
        let ranked = rank_results(fused, query.threshold(), query.limit());

        let enricher = self.enricher.clone();
        let owner_name = owner.to_string();
        let hits = tokio::task::spawn_blocking(move || enricher.enrich(ranked, &owner_name))
            .await
            .map_err(|e| SearchError::RetrievalUnavailable(format!("enrichment task failed: {e}")))?
            .map_err(|e| {
                log::error!("failed to load bookmark metadata: {e:#}");
                SearchError::RetrievalUnavailable(format!("bookmark store: {e}"))
            })?;

        log::info!(
            "search mode={:?} candidates={} hits={} partial={} took={}ms",
            mode,
            candidates,
            hits.len(),
            partial,
            started.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(SearchResponse { hits, partial })
    }
}

async fn with_timeout<F>(limit: Duration, retrieval: F) -> Retrieval
where
    F: Future<Output = Retrieval>,
{
    tokio::time::timeout(limit, retrieval)
        .await
        .unwrap_or_else(|_| Err(RetrievalError::Timeout(limit)))
}

/// Outcome of a side that was dispatched; a side that never reported failed.
fn take(side: Side, slot: Option<Retrieval>) -> Retrieval {
    slot.unwrap_or_else(|| Err(RetrievalError::Task(format!("{side} task did not report"))))
}

fn unavailable(side: Side, err: RetrievalError) -> SearchError {
    log::warn!("{side} retrieval failed: {err}");
    SearchError::RetrievalUnavailable(format!("{side} retrieval: {err}"))
}
