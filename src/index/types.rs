//! Shared types used by the vector index contract and its adapters.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with a vector index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),
    /// Backend unreachable or not initializable.
    #[error("Vector index connection failed: {0}")]
    Connection(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// A write or delete was rejected by the backend.
    #[error("Vector storage operation failed: {0}")]
    Storage(String),
}

impl IndexError {
    /// Collapse transport-level failures into the connection category used
    /// during initialization.
    pub(crate) fn into_connection(self) -> Self {
        match self {
            Self::Http(err) => Self::Connection(err.to_string()),
            other => other,
        }
    }
}

/// Parameters for a similarity search against a backend.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query embedding.
    pub vector: Vec<f32>,
    /// Upper bound on the number of returned candidates.
    pub limit: usize,
    /// Inclusive lower bound on accepted similarity scores.
    pub score_threshold: f32,
    /// Optional exact-match constraints over stored metadata fields.
    pub metadata_filter: Option<Map<String, Value>>,
    /// Caller identity for backends that filter by owner natively; `None`
    /// when the retrieval layer post-filters over-fetched candidates.
    pub caller_id: Option<String>,
}

/// Scored candidate returned by a similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    /// Identifier of the stored chunk vector.
    pub chunk_id: String,
    /// Similarity score reported by the backend.
    pub score: f32,
    /// Stored content preview, if available.
    pub content: Option<String>,
    /// Source filename, if available.
    pub filename: Option<String>,
    /// Owning document id, if available.
    pub document_id: Option<String>,
    /// Stored owner id; `None` marks an organization-wide chunk.
    pub owner_id: Option<String>,
    /// Full stored metadata payload.
    pub metadata: Map<String, Value>,
}

/// Distinct document summary derived from stored chunk metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    /// Source filename the chunks were grouped by.
    pub filename: String,
    /// Declared file type recorded at ingestion.
    pub file_type: String,
    /// Stored owner id; `None` marks an organization-wide document.
    pub owner_id: Option<String>,
    /// Number of stored chunks for the document.
    pub chunk_count: usize,
}

/// Aggregate statistics for a backend collection.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexStats {
    /// Total number of stored vectors.
    pub total_vectors: u64,
    /// Vector dimensionality of the collection.
    pub dimension: usize,
    /// Backend-reported fullness in `[0, 1]`; backends without a fullness
    /// notion report `0.0`.
    pub fill_ratio: f32,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollPoint {
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfo,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfo {
    #[serde(default)]
    pub(crate) points_count: Option<u64>,
}
