//! Qdrant adapter for the vector index contract.

use crate::config::get_config;
use crate::store::{DocumentChunk, META_DOCUMENT_ID, META_FILENAME, META_FILE_TYPE, META_OWNER};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{StreamExt, pin_mut};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::VectorIndex;
use super::filters::build_search_filter;
use super::payload::{build_chunk_payload, result_from_payload};
use super::types::{
    CollectionInfoResponse, DocumentSummary, IndexError, IndexStats, QueryResponse,
    QueryResponseResult, ScoredResult, ScrollResponse, SearchQuery,
};

/// HTTP client for a Qdrant collection holding document chunks.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
    pub(crate) dimension: usize,
}

impl QdrantIndex {
    /// Construct a client from the loaded configuration.
    pub fn new() -> Result<Self, IndexError> {
        let config = get_config();
        let url = config.qdrant_url.as_deref().ok_or_else(|| {
            IndexError::Connection("QDRANT_URL is required for the qdrant backend".to_string())
        })?;
        let client = Client::builder().user_agent("docvec/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.qdrant_collection_name,
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
            collection: config.qdrant_collection_name.clone(),
            dimension: config.embedding_dimension,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), IndexError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    async fn collection_exists(&self) -> Result<bool, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexError::UnexpectedStatus { status, body })
            }
        }
    }

    async fn create_collection(&self) -> Result<(), IndexError> {
        let body = json!({
            "vectors": {
                "size": self.dimension,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response).await?;
        tracing::debug!(
            collection = %self.collection,
            dimension = self.dimension,
            "Collection created"
        );
        Ok(())
    }

    /// Ensure keyword payload indexes exist for the fields search filters on.
    async fn ensure_payload_indexes(&self) -> Result<(), IndexError> {
        let fields = [META_OWNER, META_DOCUMENT_ID, META_FILENAME];

        for field in fields {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });

            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, "Payload index ensured");
            } else {
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    /// Stream stored payloads page by page via the scroll API.
    fn scroll_payloads(
        &self,
        with_payload: Value,
    ) -> impl Stream<Item = Result<Map<String, Value>, IndexError>> + '_ {
        try_stream! {
            let mut offset: Option<Value> = None;

            loop {
                let mut body = json!({
                    "with_payload": with_payload.clone(),
                    "with_vector": false,
                    "limit": 512,
                });
                if let Some(next) = &offset {
                    body.as_object_mut()
                        .expect("scroll body should remain an object")
                        .insert("offset".into(), next.clone());
                }

                let response = self
                    .request(
                        Method::POST,
                        &format!("collections/{}/points/scroll", self.collection),
                    )
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    Err(IndexError::UnexpectedStatus { status, body })?;
                    break;
                }

                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let Some(payload) = point.payload {
                        yield payload;
                    }
                }

                match result.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn supports_native_owner_filter(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), IndexError> {
        if !self.collection_exists().await.map_err(IndexError::into_connection)? {
            self.create_collection()
                .await
                .map_err(IndexError::into_connection)?;
        }
        self.ensure_payload_indexes()
            .await
            .map_err(IndexError::into_connection)
    }

    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize, IndexError> {
        let points: Vec<Value> = chunks
            .iter()
            .filter_map(|chunk| {
                chunk.embedding.as_ref().map(|vector| {
                    json!({
                        "id": chunk.id,
                        "vector": vector,
                        "payload": build_chunk_payload(chunk),
                    })
                })
            })
            .collect();

        if points.is_empty() {
            return Ok(0);
        }

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response).await?;
        tracing::debug!(
            collection = %self.collection,
            points = point_count,
            "Chunks upserted"
        );
        Ok(point_count)
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<ScoredResult>, IndexError> {
        let mut body = json!({
            "query": query.vector,
            "limit": query.limit,
            "score_threshold": query.score_threshold,
            "with_payload": true,
        });
        if let Some(filter) =
            build_search_filter(query.caller_id.as_deref(), query.metadata_filter.as_ref())
        {
            body.as_object_mut()
                .expect("query body should remain an object")
                .insert("filter".into(), filter);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| result_from_payload(stringify_point_id(point.id), point.score, point.payload))
            .collect();

        Ok(results)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), IndexError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": chunk_ids }))
            .send()
            .await?;

        self.ensure_success(response).await?;
        tracing::debug!(
            collection = %self.collection,
            points = chunk_ids.len(),
            "Chunks deleted"
        );
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, IndexError> {
        let stream =
            self.scroll_payloads(json!([META_FILENAME, META_FILE_TYPE, META_OWNER]));
        pin_mut!(stream);

        let mut grouped: BTreeMap<String, DocumentSummary> = BTreeMap::new();
        while let Some(payload) = stream.next().await {
            let payload = payload?;
            let Some(filename) = payload
                .get(META_FILENAME)
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
            else {
                continue;
            };

            let entry = grouped
                .entry(filename.to_string())
                .or_insert_with(|| DocumentSummary {
                    filename: filename.to_string(),
                    file_type: payload
                        .get(META_FILE_TYPE)
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    owner_id: payload
                        .get(META_OWNER)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    chunk_count: 0,
                });
            entry.chunk_count += 1;
        }

        Ok(grouped.into_values().collect())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::UnexpectedStatus { status, body });
        }

        let payload: CollectionInfoResponse = response.json().await?;
        Ok(IndexStats {
            total_vectors: payload.result.points_count.unwrap_or(0),
            dimension: self.dimension,
            fill_ratio: 0.0,
        })
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
