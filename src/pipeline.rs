//! Ingestion pipeline driving a document through extract, embed, and store.
//!
//! Each stage mutates the document only under its per-id lock; embedder and
//! index calls run outside it. Stage failures are recorded verbatim on the
//! document and re-raised to the caller. There are no automatic retries: a
//! failed document stays in `error` until resubmitted as a fresh run.

use crate::config::get_config;
use crate::embedding::{EmbedderError, EmbeddingClient};
use crate::extract::{DocumentSplitter, ExtractionError, determine_chunk_size};
use crate::index::{IndexError, VectorIndex};
use crate::store::{DocumentHandle, DocumentStatus, DocumentStore, StoreError, now_rfc3339};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document id is not registered in the store.
    #[error("Document {0} not found")]
    DocumentNotFound(String),
    /// Another ingestion run for the same document is in flight.
    #[error("Ingestion already in progress for document {0}")]
    AlreadyRunning(String),
    /// Extraction or chunking failed.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// No embedding client is configured.
    #[error("No embedding client configured")]
    EmbedderUnavailable,
    /// The document produced zero chunks, so there is nothing to embed.
    #[error("Document produced no chunks to embed")]
    NoChunks,
    /// The embedding provider failed.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
    /// No chunk carried an embedding when the store stage ran.
    #[error("No embedded chunks available to store")]
    NoEmbeddedChunks,
    /// The vector index rejected the upsert.
    #[error("Index upsert failed: {0}")]
    Index(#[from] IndexError),
    /// A remote call exceeded the configured deadline.
    #[error("Stage '{stage}' timed out after {seconds}s")]
    Timeout {
        /// Pipeline stage that exceeded the deadline.
        stage: &'static str,
        /// Configured deadline in seconds.
        seconds: u64,
    },
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::DocumentNotFound(id),
            StoreError::RunInProgress(id) => Self::AlreadyRunning(id),
        }
    }
}

/// Drives registered documents from raw bytes to indexed vectors.
pub struct IngestionPipeline {
    store: Arc<DocumentStore>,
    splitter: Arc<dyn DocumentSplitter>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
}

impl IngestionPipeline {
    /// Assemble a pipeline over the given collaborators, taking the remote
    /// call deadline from the loaded configuration.
    pub fn new(
        store: Arc<DocumentStore>,
        splitter: Arc<dyn DocumentSplitter>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            store,
            splitter,
            embedder,
            index,
            timeout: Duration::from_secs(get_config().remote_timeout_secs),
        }
    }

    /// Run the full pipeline for a registered document.
    ///
    /// Admission errors (`DocumentNotFound`, `AlreadyRunning`) return before
    /// any state change, so a rejected run never marks an in-flight document
    /// as failed.
    pub async fn run(&self, document_id: &str, raw: &[u8]) -> Result<(), PipelineError> {
        let handle = self
            .store
            .get(document_id)
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;
        let _guard = self.store.begin_run(document_id)?;

        match self.execute(&handle, raw).await {
            Ok(()) => {
                tracing::info!(document_id, "Ingestion completed");
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(document_id, error = %message, "Ingestion failed");
                handle.lock().await.record_error(message);
                Err(error)
            }
        }
    }

    async fn execute(&self, handle: &DocumentHandle, raw: &[u8]) -> Result<(), PipelineError> {
        let config = get_config();
        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
        );
        let overlap = config
            .text_splitter_chunk_overlap
            .unwrap_or(chunk_size / 5);

        let file_type = {
            let mut document = handle.lock().await;
            document.status = DocumentStatus::Processing;
            document.file_type
        };

        let texts = self.splitter.split(raw, file_type, chunk_size, overlap)?;
        let chunk_texts = {
            let mut document = handle.lock().await;
            document.attach_chunks(texts);
            document.status = DocumentStatus::Processed;
            document.processed_at = Some(now_rfc3339());
            document
                .chunks
                .iter()
                .map(|chunk| chunk.content.clone())
                .collect::<Vec<_>>()
        };

        let embedder = self
            .embedder
            .as_ref()
            .ok_or(PipelineError::EmbedderUnavailable)?;
        if chunk_texts.is_empty() {
            return Err(PipelineError::NoChunks);
        }

        let expected = chunk_texts.len();
        let vectors = self
            .bounded("embed", embedder.embed_many(chunk_texts))
            .await?;
        if vectors.len() != expected {
            return Err(PipelineError::Embedding(EmbedderError::GenerationFailed(
                format!("provider returned {} vectors for {expected} chunks", vectors.len()),
            )));
        }

        let embedded_chunks = {
            let mut document = handle.lock().await;
            for (chunk, vector) in document.chunks.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }
            document
                .chunks
                .iter()
                .filter(|chunk| chunk.embedding.is_some())
                .cloned()
                .collect::<Vec<_>>()
        };
        if embedded_chunks.is_empty() {
            return Err(PipelineError::NoEmbeddedChunks);
        }

        let stored = self
            .bounded("store", self.index.upsert(&embedded_chunks))
            .await?;
        tracing::debug!(points = stored, "Chunks stored in vector index");

        handle.lock().await.status = DocumentStatus::Embedded;
        Ok(())
    }

    async fn bounded<T, E, F>(&self, stage: &'static str, future: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, E>>,
        PipelineError: From<E>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::Timeout {
                stage,
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::ensure_test_config;
    use crate::embedding::HashEmbedder;
    use crate::extract::{DocumentKind, TokenSplitter};
    use crate::index::MemoryIndex;
    use crate::store::AccessLevel;

    fn pipeline(
        store: Arc<DocumentStore>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
    ) -> (IngestionPipeline, Arc<MemoryIndex>) {
        let config = get_config();
        let index = Arc::new(MemoryIndex::new());
        let splitter = Arc::new(TokenSplitter::new(
            config.embedding_provider,
            config.embedding_model.clone(),
        ));
        (
            IngestionPipeline::new(Arc::clone(&store), splitter, embedder, index.clone()),
            index,
        )
    }

    #[tokio::test]
    async fn run_drives_document_to_embedded() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, index) = pipeline(Arc::clone(&store), Some(Arc::new(HashEmbedder::new())));

        let document = store.create("a.txt", DocumentKind::Txt, "u1", AccessLevel::Private, None);
        pipeline
            .run(&document.id, b"some meaningful document body text")
            .await
            .expect("pipeline run");

        let handle = store.get(&document.id).expect("handle");
        let document = handle.lock().await;
        assert_eq!(document.status, DocumentStatus::Embedded);
        assert!(document.processed_at.is_some());
        assert!(!document.chunks.is_empty());
        assert_eq!(document.embedded_count(), document.chunks.len());

        let stats = index.stats().await.expect("stats");
        assert_eq!(stats.total_vectors, document.chunks.len() as u64);
    }

    #[tokio::test]
    async fn zero_chunks_fail_at_embed_stage() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, _) = pipeline(Arc::clone(&store), Some(Arc::new(HashEmbedder::new())));

        let document = store.create("empty.txt", DocumentKind::Txt, "u1", AccessLevel::Private, None);
        let error = pipeline
            .run(&document.id, b"   \n\t ")
            .await
            .expect_err("empty document");
        assert!(matches!(error, PipelineError::NoChunks));

        let handle = store.get(&document.id).expect("handle");
        let document = handle.lock().await;
        assert_eq!(document.status, DocumentStatus::Error);
        assert_eq!(document.status.progress(), 0.0);
        assert!(document.error_message.is_some());
    }

    #[tokio::test]
    async fn missing_embedder_is_reported() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, _) = pipeline(Arc::clone(&store), None);

        let document = store.create("a.txt", DocumentKind::Txt, "u1", AccessLevel::Private, None);
        let error = pipeline
            .run(&document.id, b"body text")
            .await
            .expect_err("no embedder");
        assert!(matches!(error, PipelineError::EmbedderUnavailable));

        let handle = store.get(&document.id).expect("handle");
        assert_eq!(handle.lock().await.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected_without_corrupting_state() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, _) = pipeline(Arc::clone(&store), Some(Arc::new(HashEmbedder::new())));

        let document = store.create("a.txt", DocumentKind::Txt, "u1", AccessLevel::Private, None);
        let admission = store.begin_run(&document.id).expect("admission held");

        let error = pipeline
            .run(&document.id, b"body text")
            .await
            .expect_err("admission held elsewhere");
        assert!(matches!(error, PipelineError::AlreadyRunning(_)));

        // The rejected run must not mark the document as failed.
        let handle = store.get(&document.id).expect("handle");
        assert_eq!(handle.lock().await.status, DocumentStatus::Uploaded);
        drop(admission);
    }

    #[tokio::test]
    async fn unknown_document_is_reported() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, _) = pipeline(Arc::clone(&store), Some(Arc::new(HashEmbedder::new())));

        let error = pipeline
            .run("missing-id", b"body")
            .await
            .expect_err("unknown id");
        assert!(matches!(error, PipelineError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_file_type_records_extraction_error() {
        ensure_test_config();
        let store = Arc::new(DocumentStore::new());
        let (pipeline, _) = pipeline(Arc::clone(&store), Some(Arc::new(HashEmbedder::new())));

        let document = store.create("deck.pptx", DocumentKind::Pptx, "u1", AccessLevel::Private, None);
        let error = pipeline
            .run(&document.id, b"binary blob")
            .await
            .expect_err("unsupported type");
        assert!(matches!(error, PipelineError::Extraction(_)));

        let handle = store.get(&document.id).expect("handle");
        let document = handle.lock().await;
        assert_eq!(document.status, DocumentStatus::Error);
        assert!(
            document
                .error_message
                .as_deref()
                .is_some_and(|message| message.contains("pptx"))
        );
    }
}
