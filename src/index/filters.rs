//! Filter helpers for Qdrant search queries.

use crate::store::META_OWNER;
use serde_json::{Map, Value, json};

/// Compose the Qdrant filter payload from an optional caller scope and
/// optional exact-match metadata constraints.
///
/// The caller scope becomes a nested clause requiring either an absent
/// `user_id` (organization-wide) or one matching the caller, so it combines
/// with the metadata `must` conditions as a single AND term.
pub(crate) fn build_search_filter(
    caller_id: Option<&str>,
    metadata: Option<&Map<String, Value>>,
) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(fields) = metadata {
        for (key, value) in fields {
            must.push(json!({
                "key": key,
                "match": { "value": value }
            }));
        }
    }

    if let Some(caller) = caller_id.map(str::trim).filter(|value| !value.is_empty()) {
        must.push(json!({
            "should": [
                { "is_empty": { "key": META_OWNER } },
                { "key": META_OWNER, "match": { "value": caller } }
            ]
        }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_scope_builds_owner_or_org_wide_clause() {
        let filter = build_search_filter(Some("u1"), None).expect("filter");
        assert_eq!(
            filter,
            json!({
                "must": [
                    {
                        "should": [
                            { "is_empty": { "key": "user_id" } },
                            { "key": "user_id", "match": { "value": "u1" } }
                        ]
                    }
                ]
            })
        );
    }

    #[test]
    fn metadata_constraints_become_must_clauses() {
        let mut metadata = Map::new();
        metadata.insert("file_type".into(), Value::String("txt".into()));
        let filter = build_search_filter(None, Some(&metadata)).expect("filter");
        assert_eq!(
            filter,
            json!({
                "must": [
                    { "key": "file_type", "match": { "value": "txt" } }
                ]
            })
        );
    }

    #[test]
    fn caller_and_metadata_combine_under_must() {
        let mut metadata = Map::new();
        metadata.insert("filename".into(), Value::String("a.txt".into()));
        let filter = build_search_filter(Some("u1"), Some(&metadata)).expect("filter");
        let must = filter["must"].as_array().expect("must array");
        assert_eq!(must.len(), 2);
    }

    #[test]
    fn empty_inputs_build_no_filter() {
        assert!(build_search_filter(None, None).is_none());
        assert!(build_search_filter(Some("   "), None).is_none());
        assert!(build_search_filter(None, Some(&Map::new())).is_none());
    }
}
