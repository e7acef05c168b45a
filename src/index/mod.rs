//! Vector index contract and backend adapters.
//!
//! Backends differ materially in their native filtering primitives: Qdrant
//! can express "owner matches caller OR no owner stored" inside the query,
//! while simpler stores cannot. The [`VectorIndex`] trait therefore carries a
//! declared capability flag; the retrieval layer over-fetches and
//! post-filters whenever the flag is false, so callers observe identical
//! behavior regardless of backend.

mod filters;
mod memory;
mod payload;
mod qdrant;
mod types;

pub use memory::MemoryIndex;
pub use payload::{build_chunk_payload, result_from_payload};
pub use qdrant::QdrantIndex;
pub use types::{DocumentSummary, IndexError, IndexStats, ScoredResult, SearchQuery};

use crate::store::DocumentChunk;
use async_trait::async_trait;

/// Uniform contract implemented by every vector index backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Whether the backend expresses owner-or-organization-wide filtering
    /// natively. When false, the retrieval layer over-fetches and reconciles.
    fn supports_native_owner_filter(&self) -> bool;

    /// Idempotently create the underlying collection with the configured
    /// dimension and cosine metric. Safe to call repeatedly and concurrently.
    async fn initialize(&self) -> Result<(), IndexError>;

    /// Store embedded chunks, overwriting any prior vector and metadata with
    /// the same chunk id. Chunks without an embedding are silently skipped.
    /// Returns the number of vectors written.
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize, IndexError>;

    /// Similarity search returning candidates ordered by descending score,
    /// bounded by `query.limit` and the inclusive `query.score_threshold`.
    async fn search(&self, query: SearchQuery) -> Result<Vec<ScoredResult>, IndexError>;

    /// Delete the given chunk ids; deleting a non-existent id is not an
    /// error.
    async fn delete(&self, chunk_ids: &[String]) -> Result<(), IndexError>;

    /// Enumerate distinct documents by grouping stored chunk metadata by
    /// source filename. Used to reconcile in-memory state with durable index
    /// state after a restart.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, IndexError>;

    /// Aggregate collection statistics.
    async fn stats(&self) -> Result<IndexStats, IndexError>;
}
