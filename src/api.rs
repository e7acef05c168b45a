//! HTTP surface for the docvec server.
//!
//! A compact Axum router over the retrieval service:
//!
//! - `POST /documents` – Register a document and spawn its ingestion run.
//! - `GET /documents` – List documents visible to the caller.
//! - `GET /documents/:id/status` – Processing status, or 404 when the
//!   document is missing or not visible.
//! - `DELETE /documents/:id` – Remove a document and its chunk vectors.
//! - `POST /search` – Similarity search over chunks visible to the caller.
//! - `GET /stats` – Vector index statistics.
//! - `GET /metrics` – Ingestion and search counters.
//!
//! Caller identity arrives in the `x-user-id` header; decoding tokens into
//! that header is the upstream auth layer's job. A missing header is 401.

use crate::extract::DocumentKind;
use crate::index::{IndexError, IndexStats, ScoredResult};
use crate::metrics::MetricsSnapshot;
use crate::service::{RetrievalApi, SearchError, SearchRequest};
use crate::store::{AccessLevel, Document, DocumentStatus, ProcessingStatus};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const USER_ID_HEADER: &str = "x-user-id";

/// Build the HTTP router exposing the retrieval API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RetrievalApi + 'static,
{
    Router::new()
        .route("/documents", post(upload_document::<S>).get(list_documents::<S>))
        .route("/documents/:id/status", get(get_status::<S>))
        .route("/documents/:id", axum::routing::delete(delete_document::<S>))
        .route("/search", post(search::<S>))
        .route("/stats", get(get_stats::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /documents`.
#[derive(Deserialize)]
struct UploadRequest {
    /// Original filename.
    filename: String,
    /// Declared file type (`txt`, `markdown`, `html`, ...).
    file_type: String,
    /// Access level; defaults to `private`.
    #[serde(default)]
    access_level: Option<AccessLevel>,
    /// Raw document content.
    content: String,
}

/// Success response for `POST /documents`.
#[derive(Serialize)]
struct UploadResponse {
    document_id: String,
    status: DocumentStatus,
}

/// Register a document and spawn its ingestion run.
///
/// The response reflects the `uploaded` status; callers observe progress and
/// failures through the status endpoint.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError>
where
    S: RetrievalApi + 'static,
{
    let caller = caller_id(&headers)?;
    let file_type: DocumentKind = request
        .file_type
        .parse()
        .map_err(|()| AppError::BadRequest(format!("unknown file type '{}'", request.file_type)))?;
    let access_level = request.access_level.unwrap_or(AccessLevel::Private);

    let document = service
        .create_document(&request.filename, file_type, &caller, access_level)
        .await;
    let response = UploadResponse {
        document_id: document.id.clone(),
        status: document.status,
    };

    let raw = request.content.into_bytes();
    let document_id = document.id;
    tokio::spawn(async move {
        if let Err(error) = service.run_pipeline(&document_id, &raw).await {
            tracing::error!(document_id, error = %error, "Background ingestion failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Response body for `GET /documents`.
#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

/// List documents visible to the caller.
async fn list_documents<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
) -> Result<Json<DocumentsResponse>, AppError>
where
    S: RetrievalApi,
{
    let caller = caller_id(&headers)?;
    let documents = service.list_documents(&caller).await?;
    Ok(Json(DocumentsResponse { documents }))
}

/// Fetch the processing status of a document.
async fn get_status<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
) -> Result<Json<ProcessingStatus>, AppError>
where
    S: RetrievalApi,
{
    let caller = caller_id(&headers)?;
    match service.get_status(&document_id, &caller).await {
        Some(status) => Ok(Json(status)),
        None => Err(AppError::NotFound),
    }
}

/// Delete a document and its chunk vectors.
async fn delete_document<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: RetrievalApi,
{
    let caller = caller_id(&headers)?;
    if service.delete_document(&document_id, &caller).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

/// Response body for `POST /search`.
#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ScoredResult>,
}

/// Similarity search over chunks visible to the caller.
async fn search<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: RetrievalApi,
{
    let caller = caller_id(&headers)?;
    let results = service.search(request, &caller).await?;
    Ok(Json(SearchResponse { results }))
}

/// Return vector index statistics.
async fn get_stats<S>(State(service): State<Arc<S>>) -> Result<Json<IndexStats>, AppError>
where
    S: RetrievalApi,
{
    Ok(Json(service.stats().await?))
}

/// Return ingestion and search counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RetrievalApi,
{
    Json(service.metrics())
}

fn caller_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

enum AppError {
    Unauthorized,
    NotFound,
    BadRequest(String),
    Search(SearchError),
    Index(IndexError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                format!("missing '{USER_ID_HEADER}' header"),
            )
                .into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Search(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
            Self::Index(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
        }
    }
}

impl From<SearchError> for AppError {
    fn from(inner: SearchError) -> Self {
        Self::Search(inner)
    }
}

impl From<IndexError> for AppError {
    fn from(inner: IndexError) -> Self {
        Self::Index(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineError;
    use crate::store::now_rfc3339;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use serde_json::{Map, json};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubRetrievalService {
        uploads: Mutex<Vec<(String, String)>>,
        known_document: Option<String>,
    }

    #[async_trait]
    impl RetrievalApi for StubRetrievalService {
        async fn create_document(
            &self,
            filename: &str,
            file_type: DocumentKind,
            owner_id: &str,
            access_level: AccessLevel,
        ) -> Document {
            self.uploads
                .lock()
                .await
                .push((filename.to_string(), owner_id.to_string()));
            Document {
                id: "doc-1".into(),
                filename: filename.to_string(),
                file_type,
                status: DocumentStatus::Uploaded,
                user_id: Some(owner_id.to_string()),
                access_level,
                accessible_to: Vec::new(),
                organization_id: None,
                chunks: Vec::new(),
                error_message: None,
                created_at: now_rfc3339(),
                processed_at: None,
            }
        }

        async fn run_pipeline(&self, _document_id: &str, _raw: &[u8]) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn get_status(&self, document_id: &str, _caller_id: &str) -> Option<ProcessingStatus> {
            let known = self.known_document.as_deref()?;
            if known != document_id {
                return None;
            }
            Some(ProcessingStatus {
                document_id: document_id.to_string(),
                status: DocumentStatus::Embedded,
                chunks_count: 2,
                embedded_count: 2,
                error_message: None,
                progress_percentage: 100.0,
            })
        }

        async fn search(
            &self,
            _request: SearchRequest,
            caller_id: &str,
        ) -> Result<Vec<ScoredResult>, SearchError> {
            Ok(vec![ScoredResult {
                chunk_id: "chunk-1".into(),
                score: 0.9,
                content: Some("match".into()),
                filename: Some("a.txt".into()),
                document_id: Some("doc-1".into()),
                owner_id: Some(caller_id.to_string()),
                metadata: Map::new(),
            }])
        }

        async fn delete_document(
            &self,
            document_id: &str,
            _caller_id: &str,
        ) -> Result<bool, IndexError> {
            Ok(self.known_document.as_deref() == Some(document_id))
        }

        async fn list_documents(&self, _caller_id: &str) -> Result<Vec<Document>, IndexError> {
            Ok(Vec::new())
        }

        async fn stats(&self) -> Result<IndexStats, IndexError> {
            Ok(IndexStats {
                total_vectors: 3,
                dimension: 16,
                fill_ratio: 0.0,
            })
        }

        fn metrics(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_ingested: 1,
                chunks_indexed: 2,
                searches_served: 3,
            }
        }
    }

    fn router_with(service: StubRetrievalService) -> Router {
        create_router(Arc::new(service))
    }

    #[tokio::test]
    async fn upload_requires_caller_identity() {
        let app = router_with(StubRetrievalService::default());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "filename": "a.txt",
                            "file_type": "txt",
                            "content": "body"
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_registers_document_and_returns_uploaded_status() {
        let service = Arc::new(StubRetrievalService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents")
                    .header("content-type", "application/json")
                    .header("x-user-id", "u1")
                    .body(Body::from(
                        json!({
                            "filename": "report.md",
                            "file_type": "md",
                            "access_level": "private",
                            "content": "body text"
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["document_id"], "doc-1");
        assert_eq!(json["status"], "uploaded");

        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.as_slice(), &[("report.md".to_string(), "u1".to_string())]);
    }

    #[tokio::test]
    async fn upload_rejects_unknown_file_type() {
        let app = router_with(StubRetrievalService::default());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents")
                    .header("content-type", "application/json")
                    .header("x-user-id", "u1")
                    .body(Body::from(
                        json!({
                            "filename": "a.exe",
                            "file_type": "exe",
                            "content": "body"
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_route_maps_absence_to_not_found() {
        let app = router_with(StubRetrievalService {
            known_document: Some("doc-1".into()),
            ..Default::default()
        });

        let found = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/documents/doc-1/status")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(found.status(), StatusCode::OK);
        let body = to_bytes(found.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["status"], "embedded");
        assert_eq!(json["progress_percentage"], 100.0);

        let missing = app
            .oneshot(
                Request::builder()
                    .uri("/documents/doc-2/status")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_route_maps_outcome_to_status_codes() {
        let app = router_with(StubRetrievalService {
            known_document: Some("doc-1".into()),
            ..Default::default()
        });

        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/documents/doc-1")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let absent = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/documents/doc-9")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(absent.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_route_returns_results() {
        let app = router_with(StubRetrievalService::default());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/search")
                    .header("content-type", "application/json")
                    .header("x-user-id", "u1")
                    .body(Body::from(
                        json!({ "query": "find me", "top_k": 3 }).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["results"][0]["chunk_id"], "chunk-1");
        assert_eq!(json["results"][0]["owner_id"], "u1");
    }

    #[tokio::test]
    async fn stats_and_metrics_routes_serve_snapshots() {
        let app = router_with(StubRetrievalService::default());

        let stats = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(stats.status(), StatusCode::OK);
        let body = to_bytes(stats.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["total_vectors"], 3);

        let metrics = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = to_bytes(metrics.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["searches_served"], 3);
    }
}
