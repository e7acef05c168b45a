//! Retrieval façade combining the store, pipeline, embedder, and index.
//!
//! Every operation takes an explicit caller id and expresses denial as
//! absence: an inaccessible document looks exactly like a missing one, and
//! foreign chunks never appear in search results.

use crate::access::{HierarchyService, can_access_document, reconcile};
use crate::config::{VectorBackend, get_config};
use crate::embedding::{EmbedderError, EmbeddingClient, get_embedding_client};
use crate::extract::{DocumentKind, TokenSplitter};
use crate::index::{
    IndexError, IndexStats, MemoryIndex, QdrantIndex, ScoredResult, SearchQuery, VectorIndex,
};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::pipeline::{IngestionPipeline, PipelineError};
use crate::store::{
    AccessLevel, Document, DocumentStatus, DocumentStore, ProcessingStatus, now_rfc3339,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Search parameters accepted from callers.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Query text to embed and match against stored chunks.
    pub query: String,
    /// Requested result count; clamped to the configured maximum.
    pub top_k: Option<usize>,
    /// Inclusive similarity lower bound; defaults from configuration.
    pub score_threshold: Option<f32>,
    /// Optional exact-match constraints over stored metadata fields.
    pub filter: Option<Map<String, Value>>,
}

/// Errors raised while serving a search request.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No embedding client is configured.
    #[error("No embedding client configured")]
    EmbedderUnavailable,
    /// Embedding the query failed.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbedderError),
    /// The vector index rejected the query.
    #[error("Index search failed: {0}")]
    Index(#[from] IndexError),
    /// The query embedding does not match the collection dimension.
    #[error("Query embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Dimension configured for the collection.
        expected: usize,
        /// Dimension the embedder actually produced.
        actual: usize,
    },
    /// The embedder produced an empty vector.
    #[error("Query embedding is empty")]
    EmptyEmbedding,
    /// A remote call exceeded the configured deadline.
    #[error("Search timed out after {seconds}s")]
    Timeout {
        /// Configured deadline in seconds.
        seconds: u64,
    },
}

/// Operations exposed to the HTTP layer and embedding consumers.
#[async_trait]
pub trait RetrievalApi: Send + Sync {
    /// Register a new document in `uploaded` status.
    async fn create_document(
        &self,
        filename: &str,
        file_type: DocumentKind,
        owner_id: &str,
        access_level: AccessLevel,
    ) -> Document;

    /// Run the ingestion pipeline for a registered document.
    async fn run_pipeline(&self, document_id: &str, raw: &[u8]) -> Result<(), PipelineError>;

    /// Fetch the processing status of a document the caller may access;
    /// absent means missing or not visible.
    async fn get_status(&self, document_id: &str, caller_id: &str) -> Option<ProcessingStatus>;

    /// Similarity search over chunks visible to the caller.
    async fn search(
        &self,
        request: SearchRequest,
        caller_id: &str,
    ) -> Result<Vec<ScoredResult>, SearchError>;

    /// Delete a document and its chunk vectors. `false` means missing or not
    /// visible; index failures propagate so partial deletion is never
    /// reported as success.
    async fn delete_document(&self, document_id: &str, caller_id: &str)
    -> Result<bool, IndexError>;

    /// List documents visible to the caller, merging in-process state with
    /// documents recovered from the durable index.
    async fn list_documents(&self, caller_id: &str) -> Result<Vec<Document>, IndexError>;

    /// Aggregate index statistics.
    async fn stats(&self) -> Result<IndexStats, IndexError>;

    /// Snapshot of the ingestion/search counters.
    fn metrics(&self) -> MetricsSnapshot;
}

/// Production implementation of [`RetrievalApi`].
pub struct RetrievalService {
    store: Arc<DocumentStore>,
    pipeline: IngestionPipeline,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    index: Arc<dyn VectorIndex>,
    hierarchy: Option<Arc<dyn HierarchyService>>,
    metrics: Arc<IngestMetrics>,
    timeout: Duration,
}

impl RetrievalService {
    /// Assemble the service from the loaded configuration, initializing the
    /// configured vector index backend.
    pub async fn new(hierarchy: Option<Arc<dyn HierarchyService>>) -> Result<Self, IndexError> {
        let config = get_config();
        let index: Arc<dyn VectorIndex> = match config.vector_backend {
            VectorBackend::Qdrant => Arc::new(QdrantIndex::new()?),
            VectorBackend::Memory => Arc::new(MemoryIndex::new()),
        };
        index.initialize().await?;

        let embedder: Arc<dyn EmbeddingClient> = Arc::from(get_embedding_client());
        Ok(Self::from_parts(
            Arc::new(DocumentStore::new()),
            Some(embedder),
            index,
            hierarchy,
        ))
    }

    /// Assemble the service from explicit collaborators.
    pub fn from_parts(
        store: Arc<DocumentStore>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        index: Arc<dyn VectorIndex>,
        hierarchy: Option<Arc<dyn HierarchyService>>,
    ) -> Self {
        let config = get_config();
        let splitter = Arc::new(TokenSplitter::new(
            config.embedding_provider,
            config.embedding_model.clone(),
        ));
        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            splitter,
            embedder.clone(),
            Arc::clone(&index),
        );
        Self {
            store,
            pipeline,
            embedder,
            index,
            hierarchy,
            metrics: Arc::new(IngestMetrics::new()),
            timeout: Duration::from_secs(config.remote_timeout_secs),
        }
    }

    fn hierarchy_ref(&self) -> Option<&dyn HierarchyService> {
        self.hierarchy.as_deref()
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or(SearchError::EmbedderUnavailable)?;
        let vector = match tokio::time::timeout(self.timeout, embedder.embed_one(query)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SearchError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if vector.is_empty() {
            return Err(SearchError::EmptyEmbedding);
        }
        let expected = get_config().embedding_dimension;
        if vector.len() != expected {
            return Err(SearchError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[async_trait]
impl RetrievalApi for RetrievalService {
    async fn create_document(
        &self,
        filename: &str,
        file_type: DocumentKind,
        owner_id: &str,
        access_level: AccessLevel,
    ) -> Document {
        let organization_id = match self.hierarchy_ref() {
            Some(service) => service
                .get_user(owner_id)
                .await
                .and_then(|user| user.organization_id),
            None => None,
        };
        let document =
            self.store
                .create(filename, file_type, owner_id, access_level, organization_id);
        tracing::info!(
            document_id = %document.id,
            filename,
            file_type = %file_type,
            access_level = ?access_level,
            "Document registered"
        );
        document
    }

    async fn run_pipeline(&self, document_id: &str, raw: &[u8]) -> Result<(), PipelineError> {
        self.pipeline.run(document_id, raw).await?;
        if let Some(handle) = self.store.get(document_id) {
            let chunk_count = handle.lock().await.chunks.len() as u64;
            self.metrics.record_document(chunk_count);
        }
        Ok(())
    }

    async fn get_status(&self, document_id: &str, caller_id: &str) -> Option<ProcessingStatus> {
        let handle = self.store.get(document_id)?;
        let document = handle.lock().await;
        if can_access_document(&document, caller_id, self.hierarchy_ref()).await {
            Some(ProcessingStatus::of(&document))
        } else {
            None
        }
    }

    async fn search(
        &self,
        request: SearchRequest,
        caller_id: &str,
    ) -> Result<Vec<ScoredResult>, SearchError> {
        let config = get_config();
        let top_k = request
            .top_k
            .unwrap_or(config.search_default_limit)
            .clamp(1, config.search_max_limit);
        let score_threshold = request
            .score_threshold
            .unwrap_or(config.search_default_score_threshold);

        let vector = self.embed_query(&request.query).await?;

        // Backends without a native owner filter get an over-fetched,
        // unscoped query; the visibility rule is then applied here. The
        // ceiling bounds index load for large top_k requests at the cost of
        // potentially returning fewer than top_k results in collections
        // crowded with foreign-owner chunks.
        let (limit, native_caller) = if self.index.supports_native_owner_filter() {
            (top_k, Some(caller_id.to_string()))
        } else {
            let overfetched = top_k
                .saturating_mul(config.search_overfetch_multiplier)
                .min(config.search_overfetch_ceiling)
                .max(top_k);
            (overfetched, None)
        };

        let query = SearchQuery {
            vector,
            limit,
            score_threshold,
            metadata_filter: request.filter,
            caller_id: native_caller,
        };
        let candidates = match tokio::time::timeout(self.timeout, self.index.search(query)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SearchError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        // Applied on both paths so a backend bug never leaks foreign chunks.
        let visible = reconcile(candidates, caller_id, top_k);
        self.metrics.record_search();
        tracing::debug!(
            caller_id,
            top_k,
            returned = visible.len(),
            "Search served"
        );
        Ok(visible)
    }

    async fn delete_document(
        &self,
        document_id: &str,
        caller_id: &str,
    ) -> Result<bool, IndexError> {
        let Some(handle) = self.store.get(document_id) else {
            return Ok(false);
        };

        let chunk_ids: Vec<String> = {
            let document = handle.lock().await;
            if !can_access_document(&document, caller_id, self.hierarchy_ref()).await {
                return Ok(false);
            }
            document.chunks.iter().map(|chunk| chunk.id.clone()).collect()
        };

        match tokio::time::timeout(self.timeout, self.index.delete(&chunk_ids)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(IndexError::Storage(format!(
                    "delete timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        }

        self.store.remove(document_id);
        tracing::info!(document_id, chunks = chunk_ids.len(), "Document deleted");
        Ok(true)
    }

    async fn list_documents(&self, caller_id: &str) -> Result<Vec<Document>, IndexError> {
        let mut documents = Vec::new();
        let mut known_filenames = Vec::new();

        for handle in self.store.handles() {
            let document = handle.lock().await;
            known_filenames.push(document.filename.clone());
            if can_access_document(&document, caller_id, self.hierarchy_ref()).await {
                documents.push(document.clone());
            }
        }

        // Chunks surviving in the index from before a restart have no
        // in-process record; synthesize one per distinct filename so they
        // stay listable, applying the stored-owner visibility rule in lieu of
        // lost access metadata. The synthetic ids resolve nowhere else:
        // deleting a recovered document requires re-ingesting it under the
        // same filename first. Known gap, recovery is external resubmission.
        let summaries = match tokio::time::timeout(self.timeout, self.index.list_documents()).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(IndexError::Storage(format!(
                    "document listing timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };
        for summary in summaries {
            if known_filenames.iter().any(|name| name == &summary.filename) {
                continue;
            }
            let visible = match summary.owner_id.as_deref() {
                None => true,
                Some(owner) => owner == caller_id,
            };
            if !visible {
                continue;
            }

            let access_level = if summary.owner_id.is_some() {
                AccessLevel::Private
            } else {
                AccessLevel::Public
            };
            documents.push(Document {
                id: format!("index-{}", Uuid::new_v4()),
                filename: summary.filename,
                file_type: summary
                    .file_type
                    .parse()
                    .unwrap_or(DocumentKind::Txt),
                status: DocumentStatus::Embedded,
                user_id: summary.owner_id,
                access_level,
                accessible_to: Vec::new(),
                organization_id: None,
                chunks: Vec::new(),
                error_message: None,
                created_at: now_rfc3339(),
                processed_at: None,
            });
        }

        Ok(documents)
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        match tokio::time::timeout(self.timeout, self.index.stats()).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Storage(format!(
                "stats timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
