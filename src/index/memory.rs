//! In-process vector index used for development and tests.

use crate::config::get_config;
use crate::store::{DocumentChunk, META_FILENAME, META_FILE_TYPE, META_OWNER};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::VectorIndex;
use super::payload::{build_chunk_payload, result_from_payload};
use super::types::{DocumentSummary, IndexError, IndexStats, ScoredResult, SearchQuery};

struct StoredPoint {
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

/// Vector index backed by a process-local map with cosine similarity.
///
/// Deliberately declares no native owner filtering so the retrieval layer
/// exercises its over-fetch and post-filter path against this backend. The
/// owner constraint is still honored here when a caller id is supplied.
pub struct MemoryIndex {
    points: Mutex<HashMap<String, StoredPoint>>,
    dimension: usize,
}

impl MemoryIndex {
    /// Construct an empty index sized from the loaded configuration.
    pub fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
            dimension: get_config().embedding_dimension,
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn supports_native_owner_filter(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize, IndexError> {
        let mut points = self
            .points
            .lock()
            .map_err(|_| IndexError::Storage("memory index lock poisoned".to_string()))?;

        let mut written = 0;
        for chunk in chunks {
            let Some(vector) = chunk.embedding.clone() else {
                continue;
            };
            points.insert(
                chunk.id.clone(),
                StoredPoint {
                    vector,
                    payload: build_chunk_payload(chunk),
                },
            );
            written += 1;
        }
        Ok(written)
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<ScoredResult>, IndexError> {
        let points = self
            .points
            .lock()
            .map_err(|_| IndexError::Storage("memory index lock poisoned".to_string()))?;

        let mut scored: Vec<ScoredResult> = points
            .iter()
            .filter(|(_, point)| matches_metadata(&point.payload, query.metadata_filter.as_ref()))
            .filter(|(_, point)| matches_caller(&point.payload, query.caller_id.as_deref()))
            .map(|(id, point)| {
                let score = cosine_similarity(&query.vector, &point.vector);
                result_from_payload(id.clone(), score, Some(point.payload.clone()))
            })
            .filter(|result| result.score >= query.score_threshold)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(query.limit);
        Ok(scored)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<(), IndexError> {
        let mut points = self
            .points
            .lock()
            .map_err(|_| IndexError::Storage("memory index lock poisoned".to_string()))?;
        for id in chunk_ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, IndexError> {
        let points = self
            .points
            .lock()
            .map_err(|_| IndexError::Storage("memory index lock poisoned".to_string()))?;

        let mut grouped: BTreeMap<String, DocumentSummary> = BTreeMap::new();
        for point in points.values() {
            let Some(filename) = point
                .payload
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
                    file_type: point
                        .payload
                        .get(META_FILE_TYPE)
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    owner_id: point
                        .payload
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
        let points = self
            .points
            .lock()
            .map_err(|_| IndexError::Storage("memory index lock poisoned".to_string()))?;
        Ok(IndexStats {
            total_vectors: points.len() as u64,
            dimension: self.dimension,
            fill_ratio: 0.0,
        })
    }
}

fn matches_metadata(payload: &Map<String, Value>, filter: Option<&Map<String, Value>>) -> bool {
    let Some(fields) = filter else {
        return true;
    };
    fields
        .iter()
        .all(|(key, value)| payload.get(key) == Some(value))
}

fn matches_caller(payload: &Map<String, Value>, caller_id: Option<&str>) -> bool {
    let Some(caller) = caller_id else {
        return true;
    };
    match payload.get(META_OWNER).and_then(Value::as_str) {
        None => true,
        Some(owner) => owner == caller,
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
