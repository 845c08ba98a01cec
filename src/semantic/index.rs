//! In-memory vector index with cosine similarity search.
//!
//! Stores bookmark embeddings per owner and provides nearest-neighbor search.

use std::collections::HashMap;
use std::sync::RwLock;

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub owner: String,
    /// Hash of the content that was embedded
    pub content_hash: u64,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

/// Nearest-neighbor lookup scoped to one owner.
pub trait VectorSource: Send + Sync {
    /// The `k` most similar vectors owned by `owner`, best first.
    /// Equal scores are ordered by ascending id.
    fn nearest_neighbors(
        &self,
        vector: &[f32],
        owner: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError>;
}

/// In-memory vector index for semantic search.
///
/// Dimensions are fixed by the first inserted vector unless given upfront.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: HashMap<u64, VectorEntry>,
    dimensions: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions: Some(dimensions),
        }
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the embedding of a bookmark.
    ///
    /// Returns an error on dimension mismatch or zero norm.
    pub fn insert(
        &mut self,
        id: u64,
        owner: &str,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        if let Some(expected) = self.dimensions {
            if embedding.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
        }

        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.dimensions = Some(embedding.len());
        self.entries.insert(
            id,
            VectorEntry {
                owner: owner.to_string(),
                content_hash,
                embedding,
            },
        );

        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<VectorEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&VectorEntry> {
        self.entries.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Cosine-similarity search over one owner's vectors.
    pub fn search(&self, query: &[f32], owner: &str, k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(vec![]);
        }

        if let Some(expected) = self.dimensions {
            if query.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, entry)| Neighbor {
                id: *id,
                score: cosine_similarity(query, &entry.embedding, query_norm),
            })
            .collect();

        // HashMap iteration order is random, the id keeps ties reproducible
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        results.truncate(k);

        Ok(results)
    }
}

impl VectorSource for RwLock<VectorIndex> {
    fn nearest_neighbors(
        &self,
        vector: &[f32],
        owner: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let index = self.read().map_err(|_| IndexError::Poisoned)?;
        index.search(vector, owner, k)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Assumes query_norm is precomputed.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Index lock poisoned")]
    Poisoned,

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), None);
    }

    #[test]
    fn test_first_insert_fixes_dimensions() {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 10, vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(index.dimensions(), Some(3));

        let result = index.insert(2, "alice", 20, vec![1.0, 0.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_insert_zero_norm_rejected() {
        let mut index = VectorIndex::with_dimensions(3, 1);
        let result = index.insert(1, "alice", 10, vec![0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_insert_replaces_entry() {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 10, vec![1.0, 0.0]).unwrap();
        index.insert(1, "alice", 11, vec![0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(1).unwrap().content_hash, 11);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 10, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, "alice", 20, vec![0.0, 1.0, 0.0]).unwrap();
        index.insert(3, "alice", 30, vec![0.7, 0.7, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], "alice", 10).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_search_scoped_to_owner() {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 10, vec![1.0, 0.0]).unwrap();
        index.insert(2, "bob", 20, vec![1.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0], "bob", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);

        assert!(index.search(&[1.0, 0.0], "carol", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_ties_ordered_by_id() {
        let mut index = VectorIndex::new();
        for id in [9, 3, 7, 1, 5] {
            index.insert(id, "alice", id, vec![1.0, 1.0]).unwrap();
        }

        for _ in 0..5 {
            let ids: Vec<u64> = index
                .search(&[1.0, 1.0], "alice", 10)
                .unwrap()
                .iter()
                .map(|r| r.id)
                .collect();
            assert_eq!(ids, vec![1, 3, 5, 7, 9]);
        }
    }

    #[test]
    fn test_search_with_limit() {
        let mut index = VectorIndex::new();
        for i in 0..10 {
            index
                .insert(i, "alice", i, vec![1.0, i as f32 * 0.1, 0.0])
                .unwrap();
        }

        let results = index.search(&[1.0, 0.0, 0.0], "alice", 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 0);
    }

    #[test]
    fn test_search_rejects_bad_query() {
        let mut index = VectorIndex::new();
        index.insert(1, "alice", 10, vec![1.0, 0.0]).unwrap();

        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], "alice", 10),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[0.0, 0.0], "alice", 10),
            Err(IndexError::ZeroNormVector)
        ));
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 0.0], "alice", 10).unwrap().is_empty());
    }

    #[test]
    fn test_vector_source_for_locked_index() {
        let mut index = VectorIndex::new();
        index.insert(4, "alice", 1, vec![0.0, 1.0]).unwrap();
        let shared = RwLock::new(index);

        let hits = shared.nearest_neighbors(&[0.0, 2.0], "alice", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
