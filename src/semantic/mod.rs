//! Semantic search infrastructure for bookmark embeddings.
//!
//! Embeddings are generated locally with fastembed-rs and searched in memory.
//!
//! # Architecture
//!
//! - `embeddings`: `Embedder` seam and the fastembed-backed models
//! - `index`: In-memory vector index with cosine similarity search
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `preprocess`: Text preprocessing for embedding input
//! - `retriever`: Query-time semantic retrieval

pub mod embeddings;
mod index;
mod preprocess;
mod retriever;
mod storage;

pub use embeddings::{hash_model_name, Embedder, EmbeddingError, EmbeddingModel, LazyEmbedder};
pub use index::{IndexError, Neighbor, VectorEntry, VectorIndex, VectorSource};
pub use preprocess::{content_hash, preprocess_bookmark, preprocess_query};
pub use retriever::SemanticRetriever;
pub use storage::{VectorStorage, VectorStorageError};
