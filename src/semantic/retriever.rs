//! Semantic retrieval: embed the query, then ask the vector index for the
//! owner's nearest bookmarks.

use std::sync::Arc;

use crate::search::{RankedCandidate, RetrievalError};
use crate::semantic::embeddings::Embedder;
use crate::semantic::index::VectorSource;
use crate::semantic::preprocess::preprocess_query;

pub struct SemanticRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorSource>,
    min_similarity: f32,
}

impl SemanticRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorSource>,
        min_similarity: f32,
    ) -> Self {
        Self {
            embedder,
            index,
            min_similarity,
        }
    }

    /// Up to `k` of the owner's bookmarks closest to `query_text`, ranked from 1.
    ///
    /// Neighbors below the similarity floor are dropped, so fewer than `k`
    /// candidates (or none) is a normal outcome.
    pub async fn retrieve(
        &self,
        query_text: &str,
        owner: &str,
        k: usize,
    ) -> Result<Vec<RankedCandidate>, RetrievalError> {
        let Some(text) = preprocess_query(query_text) else {
            return Ok(vec![]);
        };
        if k == 0 {
            return Ok(vec![]);
        }

        // model inference and the index scan are CPU bound
        let embedder = self.embedder.clone();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text)).await??;

        let index = self.index.clone();
        let owner = owner.to_string();
        let neighbors =
            tokio::task::spawn_blocking(move || index.nearest_neighbors(&vector, &owner, k))
                .await??;

        let candidates: Vec<RankedCandidate> = neighbors
            .into_iter()
            .filter(|n| n.score >= self.min_similarity)
            .enumerate()
            .map(|(i, n)| RankedCandidate {
                id: n.id,
                rank: i + 1,
                score: n.score,
                matched_categories: vec![],
            })
            .collect();

        log::debug!(
            "semantic retrieval: {} candidates (k={}, floor={})",
            candidates.len(),
            k,
            self.min_similarity
        );

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::EmbeddingError;
    use crate::semantic::index::VectorIndex;
    use std::sync::RwLock;

    /// Maps known words to fixed axes.
    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("rust") { 1.0 } else { 0.0 },
                if text.contains("cooking") { 1.0 } else { 0.0 },
                0.01,
            ])
        }

        fn model_id_hash(&self) -> [u8; 32] {
            [7u8; 32]
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("model not loaded".to_string()))
        }

        fn model_id_hash(&self) -> [u8; 32] {
            [0u8; 32]
        }
    }

    fn index() -> Arc<RwLock<VectorIndex>> {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 1, vec![1.0, 0.0, 0.01]).unwrap();
        index.insert(2, "alice", 2, vec![0.0, 1.0, 0.01]).unwrap();
        index.insert(3, "alice", 3, vec![0.8, 0.2, 0.01]).unwrap();
        index.insert(4, "bob", 4, vec![1.0, 0.0, 0.01]).unwrap();
        Arc::new(RwLock::new(index))
    }

    #[tokio::test]
    async fn test_ranks_nearest_first_and_applies_floor() {
        let retriever = SemanticRetriever::new(Arc::new(AxisEmbedder), index(), 0.35);

        let hits = retriever.retrieve("rust", "alice", 10).await.unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        // bookmark 2 is about cooking, below the floor
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| h.matched_categories.is_empty()));
    }

    #[tokio::test]
    async fn test_scoped_to_owner() {
        let retriever = SemanticRetriever::new(Arc::new(AxisEmbedder), index(), 0.0);

        let hits = retriever.retrieve("rust", "bob", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 4);

        assert!(retriever.retrieve("rust", "carol", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respects_k() {
        let retriever = SemanticRetriever::new(Arc::new(AxisEmbedder), index(), 0.0);
        let hits = retriever.retrieve("rust", "alice", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let retriever = SemanticRetriever::new(Arc::new(BrokenEmbedder), index(), 0.0);
        let result = retriever.retrieve("rust", "alice", 10).await;
        assert!(matches!(
            result,
            Err(RetrievalError::EmbeddingUnavailable(_))
        ));
    }
}
