//! Construction and parsing of the stored chunk payload.
//!
//! The payload is the durable carrier of access-control data. Its field
//! names (`document_id`, `filename`, `file_type`, `user_id`, `content`,
//! `chunk_index`, `content_hash`, `timestamp`) are stable across backends so
//! that migrating an index never loses access semantics. The owner field is
//! omitted entirely for organization-wide chunks; both Qdrant's `is_empty`
//! condition and the post-filter treat absence as "visible to all".

use crate::store::{DocumentChunk, META_CONTENT, META_DOCUMENT_ID, META_FILENAME, META_OWNER};
use serde_json::{Map, Value};

use super::types::ScoredResult;

/// Build the payload object stored alongside a chunk vector.
pub fn build_chunk_payload(chunk: &DocumentChunk) -> Map<String, Value> {
    let mut payload = chunk.metadata.clone();
    match &chunk.user_id {
        Some(owner) if !owner.trim().is_empty() => {
            payload.insert(META_OWNER.into(), Value::String(owner.clone()));
        }
        _ => {
            payload.remove(META_OWNER);
        }
    }
    payload
}

/// Map a stored payload back into a scored search result.
pub fn result_from_payload(
    chunk_id: String,
    score: f32,
    payload: Option<Map<String, Value>>,
) -> ScoredResult {
    let metadata = payload.unwrap_or_default();
    let content = string_field(&metadata, META_CONTENT);
    let filename = string_field(&metadata, META_FILENAME);
    let document_id = string_field(&metadata, META_DOCUMENT_ID);
    let owner_id = string_field(&metadata, META_OWNER);

    ScoredResult {
        chunk_id,
        score,
        content,
        filename,
        document_id,
        owner_id,
        metadata,
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}
