//! Document/chunk data model, lifecycle state machine, and the shared
//! in-process registry.
//!
//! The registry owns `Document` records for their in-process lifetime only:
//! once chunks are embedded and upserted, the vector index is the durable
//! system of record and the registry is a cache of pipeline state. Each
//! document sits behind its own async mutex so unrelated documents never
//! serialize on one another; a separate admission set guards against two
//! ingestion runs for the same id.

use crate::extract::DocumentKind;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Metadata field: owning document id.
pub const META_DOCUMENT_ID: &str = "document_id";
/// Metadata field: source filename.
pub const META_FILENAME: &str = "filename";
/// Metadata field: declared file type.
pub const META_FILE_TYPE: &str = "file_type";
/// Metadata field: denormalized owner id. Omitted entirely for
/// organization-wide documents so backends can treat absence as "visible to
/// all callers".
pub const META_OWNER: &str = "user_id";
/// Metadata field: truncated content preview.
pub const META_CONTENT: &str = "content";
/// Metadata field: zero-based chunk position within the document.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata field: SHA-256 digest of the chunk content.
pub const META_CONTENT_HASH: &str = "content_hash";
/// Metadata field: ingestion timestamp (RFC3339).
pub const META_TIMESTAMP: &str = "timestamp";

/// Maximum number of characters kept in the stored content preview.
pub const CONTENT_PREVIEW_CHARS: usize = 1000;

/// Lifecycle states of a document moving through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Record created; raw bytes not yet processed.
    Uploaded,
    /// Extraction and chunking in progress.
    Processing,
    /// Chunks attached; embeddings not yet generated.
    Processed,
    /// Every chunk embedded and upserted into the index. Terminal.
    Embedded,
    /// A pipeline stage failed; `error_message` holds the cause. Terminal.
    Error,
}

impl DocumentStatus {
    /// Fixed progress percentage reported to external consumers.
    ///
    /// These four points are a compatibility contract, not a metric:
    /// uploaded=0, processing=25, processed=50, embedded=100, error=0.
    pub fn progress(self) -> f32 {
        match self {
            Self::Uploaded | Self::Error => 0.0,
            Self::Processing => 25.0,
            Self::Processed => 50.0,
            Self::Embedded => 100.0,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Embedded => "embedded",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document access levels for the document-level three-tier policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Owner only, or members of the explicit allow-list.
    Private,
    /// Visible to users below the owner in the organizational hierarchy.
    Hierarchy,
    /// Visible to anyone sharing the owner's organization.
    Public,
}

/// A contiguous span of document text: the unit of embedding and storage.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentChunk {
    /// Globally unique chunk id, also the vector id in the index.
    pub id: String,
    /// Chunk text content.
    pub content: String,
    /// Owner id copied from the document so capability-limited backends can
    /// filter at the index level without a join back to the document table.
    pub user_id: Option<String>,
    /// Free-form metadata persisted alongside the vector.
    pub metadata: Map<String, Value>,
    /// Embedding vector, absent until the embedding stage completes.
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// A document record tracked through the ingestion lifecycle.
#[derive(Clone, Debug, Serialize)]
pub struct Document {
    /// Unique document id.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// Declared file type.
    pub file_type: DocumentKind,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Owning user id; `None` marks an organization-wide document. Immutable
    /// once set.
    pub user_id: Option<String>,
    /// Access level for document-level checks.
    pub access_level: AccessLevel,
    /// Explicit allow-list consulted for `private` documents.
    pub accessible_to: Vec<String>,
    /// Organization the document belongs to.
    pub organization_id: Option<String>,
    /// Ordered chunks produced by extraction.
    pub chunks: Vec<DocumentChunk>,
    /// Failure message, set only in `error` status.
    pub error_message: Option<String>,
    /// Creation timestamp (RFC3339).
    pub created_at: String,
    /// Processing completion timestamp (RFC3339).
    pub processed_at: Option<String>,
}

impl Document {
    /// Replace this document's chunks with freshly attached ones built from
    /// `texts`, copying the owner id and seeding the stable metadata fields.
    pub fn attach_chunks(&mut self, texts: Vec<String>) {
        let now = now_rfc3339();
        self.chunks = texts
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let mut metadata = Map::new();
                metadata.insert(META_DOCUMENT_ID.into(), Value::String(self.id.clone()));
                metadata.insert(META_FILENAME.into(), Value::String(self.filename.clone()));
                metadata.insert(
                    META_FILE_TYPE.into(),
                    Value::String(self.file_type.as_str().to_string()),
                );
                metadata.insert(META_CHUNK_INDEX.into(), Value::from(index));
                metadata.insert(
                    META_CONTENT_HASH.into(),
                    Value::String(compute_content_hash(&content)),
                );
                metadata.insert(
                    META_CONTENT.into(),
                    Value::String(content_preview(&content).to_string()),
                );
                metadata.insert(META_TIMESTAMP.into(), Value::String(now.clone()));
                DocumentChunk {
                    id: Uuid::new_v4().to_string(),
                    content,
                    user_id: self.user_id.clone(),
                    metadata,
                    embedding: None,
                }
            })
            .collect();
    }

    /// Record a stage failure, keeping already-produced chunks for diagnostics.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.status = DocumentStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Number of chunks that currently carry an embedding.
    pub fn embedded_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.embedding.is_some())
            .count()
    }
}

/// External view of a document's pipeline progress.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessingStatus {
    /// Document id the status describes.
    pub document_id: String,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Number of chunks produced so far.
    pub chunks_count: usize,
    /// Number of chunks carrying an embedding.
    pub embedded_count: usize,
    /// Failure message when the status is `error`.
    pub error_message: Option<String>,
    /// Fixed progress percentage for the current status.
    pub progress_percentage: f32,
}

impl ProcessingStatus {
    /// Build a status snapshot from a document record.
    pub fn of(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            status: document.status,
            chunks_count: document.chunks.len(),
            embedded_count: document.embedded_count(),
            error_message: document.error_message.clone(),
            progress_percentage: document.status.progress(),
        }
    }
}

/// Errors raised by the document registry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document with the given id is registered.
    #[error("Document {0} not found")]
    NotFound(String),
    /// An ingestion run for the document is already active.
    #[error("Ingestion already in progress for document {0}")]
    RunInProgress(String),
}

/// Shared handle to a registered document.
pub type DocumentHandle = Arc<AsyncMutex<Document>>;

/// In-process registry of documents keyed by id, with per-id locking and an
/// admission guard serializing ingestion runs per document.
#[derive(Default)]
pub struct DocumentStore {
    documents: StdMutex<HashMap<String, DocumentHandle>>,
    active_runs: StdMutex<HashSet<String>>,
}

impl DocumentStore {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new document in `uploaded` status.
    ///
    /// The owner is dropped iff the access level is organization-wide
    /// (`public`), matching the stored-chunk visibility rule.
    pub fn create(
        &self,
        filename: &str,
        file_type: DocumentKind,
        owner_id: &str,
        access_level: AccessLevel,
        organization_id: Option<String>,
    ) -> Document {
        let user_id = match access_level {
            AccessLevel::Public => None,
            _ => Some(owner_id.to_string()),
        };
        let document = Document {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            file_type,
            status: DocumentStatus::Uploaded,
            user_id,
            access_level,
            accessible_to: Vec::new(),
            organization_id,
            chunks: Vec::new(),
            error_message: None,
            created_at: now_rfc3339(),
            processed_at: None,
        };
        let snapshot = document.clone();
        self.documents
            .lock()
            .expect("document registry lock poisoned")
            .insert(document.id.clone(), Arc::new(AsyncMutex::new(document)));
        snapshot
    }

    /// Fetch the handle for a document id, if registered.
    pub fn get(&self, document_id: &str) -> Option<DocumentHandle> {
        self.documents
            .lock()
            .expect("document registry lock poisoned")
            .get(document_id)
            .cloned()
    }

    /// Remove a document from the registry, returning its handle.
    pub fn remove(&self, document_id: &str) -> Option<DocumentHandle> {
        self.documents
            .lock()
            .expect("document registry lock poisoned")
            .remove(document_id)
    }

    /// Snapshot the handles of every registered document.
    pub fn handles(&self) -> Vec<DocumentHandle> {
        self.documents
            .lock()
            .expect("document registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Admit an ingestion run for `document_id`, rejecting a second
    /// concurrent run for the same id. The returned guard releases the
    /// admission on drop.
    pub fn begin_run(self: &Arc<Self>, document_id: &str) -> Result<RunGuard, StoreError> {
        if self.get(document_id).is_none() {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        let mut active = self
            .active_runs
            .lock()
            .expect("active run set lock poisoned");
        if !active.insert(document_id.to_string()) {
            return Err(StoreError::RunInProgress(document_id.to_string()));
        }
        Ok(RunGuard {
            store: Arc::clone(self),
            document_id: document_id.to_string(),
        })
    }
}

/// Admission guard for a single ingestion run; releases the per-id slot on
/// drop.
pub struct RunGuard {
    store: Arc<DocumentStore>,
    document_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.store
            .active_runs
            .lock()
            .expect("active run set lock poisoned")
            .remove(&self.document_id);
    }
}

/// Compute a deterministic SHA-256 hash for chunk content.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate content to the stored preview length on a char boundary.
pub fn content_preview(text: &str) -> &str {
    match text.char_indices().nth(CONTENT_PREVIEW_CHARS) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Current timestamp formatted for record storage.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
