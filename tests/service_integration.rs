//! End-to-end scenarios over the in-memory vector index backend.

use docvec::config::{CONFIG, Config, EmbeddingProvider, VectorBackend};
use docvec::embedding::HashEmbedder;
use docvec::extract::DocumentKind;
use docvec::index::{MemoryIndex, VectorIndex};
use docvec::pipeline::PipelineError;
use docvec::service::{RetrievalApi, RetrievalService, SearchRequest};
use docvec::store::{AccessLevel, Document, DocumentStatus, DocumentStore};
use std::sync::Arc;

fn ensure_config() {
    let _ = CONFIG.set(Config {
        vector_backend: VectorBackend::Memory,
        qdrant_url: None,
        qdrant_collection_name: "documents-test".into(),
        qdrant_api_key: None,
        embedding_provider: EmbeddingProvider::OpenAI,
        embedding_model: "text-embedding-3-small".into(),
        embedding_dimension: 16,
        text_splitter_chunk_size: Some(64),
        text_splitter_chunk_overlap: None,
        search_default_limit: 5,
        search_max_limit: 50,
        search_default_score_threshold: 0.0,
        search_overfetch_multiplier: 4,
        search_overfetch_ceiling: 256,
        remote_timeout_secs: 5,
        server_port: None,
    });
}

fn new_index() -> Arc<MemoryIndex> {
    ensure_config();
    Arc::new(MemoryIndex::new())
}

fn service_over(index: Arc<MemoryIndex>) -> RetrievalService {
    RetrievalService::from_parts(
        Arc::new(DocumentStore::new()),
        Some(Arc::new(HashEmbedder::new())),
        index as Arc<dyn VectorIndex>,
        None,
    )
}

async fn ingest(
    service: &RetrievalService,
    filename: &str,
    owner: &str,
    level: AccessLevel,
    body: &str,
) -> Document {
    let document = service
        .create_document(filename, DocumentKind::Txt, owner, level)
        .await;
    service
        .run_pipeline(&document.id, body.as_bytes())
        .await
        .expect("ingestion");
    document
}

fn search_for(query: &str, top_k: usize) -> SearchRequest {
    SearchRequest {
        query: query.into(),
        top_k: Some(top_k),
        score_threshold: None,
        filter: None,
    }
}

// Long enough to split into multiple chunks under the 64-token test budget.
fn multi_chunk_body() -> String {
    "the quarterly report covers revenue growth and churn across regions ".repeat(30)
}

#[tokio::test]
async fn private_document_chunks_are_visible_to_owner_only() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    let body = multi_chunk_body();
    let document = ingest(&service, "report.txt", "u1", AccessLevel::Private, &body).await;

    let status = service
        .get_status(&document.id, "u1")
        .await
        .expect("owner status");
    assert!(status.chunks_count >= 2, "expected a multi-chunk document");

    let as_owner = service
        .search(search_for("quarterly revenue growth", 10), "u1")
        .await
        .expect("owner search");
    assert!(!as_owner.is_empty());
    for result in &as_owner {
        assert_eq!(result.owner_id.as_deref(), Some("u1"));
    }

    let as_foreign = service
        .search(search_for("quarterly revenue growth", 10), "u2")
        .await
        .expect("foreign search");
    assert!(as_foreign.is_empty(), "foreign caller saw private chunks");
}

#[tokio::test]
async fn public_document_is_visible_to_any_caller() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    ingest(
        &service,
        "handbook.txt",
        "u1",
        AccessLevel::Public,
        "company handbook policies for everyone to read",
    )
    .await;

    for caller in ["u1", "u2", "someone-else"] {
        let results = service
            .search(search_for("company handbook policies", 5), caller)
            .await
            .expect("search");
        assert!(!results.is_empty(), "public chunks hidden from {caller}");
        assert!(results.iter().all(|result| result.owner_id.is_none()));
    }
}

#[tokio::test]
async fn embedded_status_implies_every_chunk_has_an_embedding() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    let body = multi_chunk_body();
    let document = ingest(&service, "report.txt", "u1", AccessLevel::Private, &body).await;

    let status = service
        .get_status(&document.id, "u1")
        .await
        .expect("status");
    assert_eq!(status.status, DocumentStatus::Embedded);
    assert_eq!(status.embedded_count, status.chunks_count);
    assert_eq!(status.progress_percentage, 100.0);
}

#[tokio::test]
async fn delete_removes_all_chunk_vectors_from_the_index() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    let body = multi_chunk_body();
    let document = ingest(&service, "report.txt", "u1", AccessLevel::Private, &body).await;

    let before = index.stats().await.expect("stats");
    assert!(before.total_vectors >= 2);

    assert!(
        service
            .delete_document(&document.id, "u1")
            .await
            .expect("delete")
    );

    let after = index.stats().await.expect("stats");
    assert_eq!(after.total_vectors, 0);
    assert!(service.get_status(&document.id, "u1").await.is_none());
}

#[tokio::test]
async fn zero_chunk_ingestion_fails_at_the_embed_stage() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    let document = service
        .create_document("empty.txt", DocumentKind::Txt, "u1", AccessLevel::Private)
        .await;
    let error = service
        .run_pipeline(&document.id, b"  \n\t  ")
        .await
        .expect_err("empty document");
    assert!(matches!(error, PipelineError::NoChunks));

    let status = service
        .get_status(&document.id, "u1")
        .await
        .expect("status");
    assert_eq!(status.status, DocumentStatus::Error);
    assert_eq!(status.progress_percentage, 0.0);
    assert!(status.error_message.is_some());

    let stats = index.stats().await.expect("stats");
    assert_eq!(stats.total_vectors, 0);
}

#[tokio::test]
async fn stored_chunk_ranks_first_for_its_own_content() {
    let index = new_index();
    let service = service_over(Arc::clone(&index));

    let needle = "zebra xylophone quantum aardvark";
    ingest(&service, "needle.txt", "u1", AccessLevel::Private, needle).await;
    ingest(
        &service,
        "noise.txt",
        "u1",
        AccessLevel::Private,
        "completely unrelated filler material about cooking pasta",
    )
    .await;

    let results = service
        .search(search_for(needle, 5), "u1")
        .await
        .expect("search");
    assert!(!results.is_empty());
    let top = &results[0];
    assert_eq!(top.filename.as_deref(), Some("needle.txt"));
    // Identical text embeds to the identical vector; cosine similarity is 1.
    assert!(top.score > 0.999, "top score was {}", top.score);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    ensure_config();
    let index = MemoryIndex::new();
    index.initialize().await.expect("first initialize");
    index.initialize().await.expect("second initialize");
    let stats = index.stats().await.expect("stats");
    assert_eq!(stats.total_vectors, 0);
}
