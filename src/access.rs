//! Visibility rules enforced over search results and document records.
//!
//! Two distinct policies live here:
//!
//! - The **chunk-level rule** applied to every search candidate: a stored
//!   vector with no owner is organization-wide and always visible; one with
//!   an owner is visible only to that owner. Candidates failing the rule are
//!   discarded, not down-ranked. The same rule runs whether the backend
//!   filtered natively or the retrieval layer is post-filtering over-fetched
//!   candidates, so behavior is identical across backends.
//! - The **document-level three-tier policy** (`private`/`hierarchy`/
//!   `public`) consumed from the external hierarchy collaborator. It applies
//!   only to operations on an already-known document id (status lookup,
//!   deletion), never to bulk vector search.

use crate::index::ScoredResult;
use crate::store::{AccessLevel, Document};
use async_trait::async_trait;

/// Minimal user record surfaced by the hierarchy collaborator.
#[derive(Clone, Debug)]
pub struct UserRecord {
    /// Organization the user belongs to.
    pub organization_id: Option<String>,
}

/// Contract for the external user-hierarchy subsystem.
#[async_trait]
pub trait HierarchyService: Send + Sync {
    /// Whether `candidate_id` sits below `ancestor_id` in the organizational
    /// hierarchy.
    async fn is_descendant(&self, candidate_id: &str, ancestor_id: &str) -> bool;

    /// Look up a user record, absent when the user is unknown.
    async fn get_user(&self, user_id: &str) -> Option<UserRecord>;
}

/// Chunk-level visibility: no stored owner means organization-wide, an owner
/// means owner-only.
pub fn is_chunk_visible(caller_id: &str, stored_owner: Option<&str>) -> bool {
    match stored_owner {
        None => true,
        Some(owner) => owner == caller_id,
    }
}

/// Drop candidates the caller may not see and cap the survivors at `top_k`,
/// preserving the backend's score ordering.
pub fn reconcile(results: Vec<ScoredResult>, caller_id: &str, top_k: usize) -> Vec<ScoredResult> {
    let mut visible: Vec<ScoredResult> = results
        .into_iter()
        .filter(|result| is_chunk_visible(caller_id, result.owner_id.as_deref()))
        .collect();
    visible.truncate(top_k);
    visible
}

/// Document-level access check for status lookup and deletion.
///
/// The owner (and anyone when the document is organization-wide) is always
/// admitted. Otherwise the access level decides: `private` consults the
/// explicit allow-list, `hierarchy` asks the collaborator whether the caller
/// sits below the owner, and `public` requires a shared organization id.
/// Without a hierarchy collaborator the non-owner tiers deny.
pub async fn can_access_document(
    document: &Document,
    caller_id: &str,
    hierarchy: Option<&dyn HierarchyService>,
) -> bool {
    let Some(owner) = document.user_id.as_deref() else {
        return true;
    };
    if owner == caller_id {
        return true;
    }

    match document.access_level {
        AccessLevel::Private => document.accessible_to.iter().any(|id| id == caller_id),
        AccessLevel::Hierarchy => match hierarchy {
            Some(service) => service.is_descendant(caller_id, owner).await,
            None => false,
        },
        AccessLevel::Public => match (hierarchy, document.organization_id.as_deref()) {
            (Some(service), Some(organization)) => service
                .get_user(caller_id)
                .await
                .and_then(|user| user.organization_id)
                .is_some_and(|candidate| candidate == organization),
            _ => false,
        },
    }
}
