//! Three-way merge and conflict classification for session and grid entities.
//!
//! This is the only place the core crate looks past "opaque JSON blob" for a
//! payload: session and grid payloads carry a small, named shape
//! (`gridItems`, `backlogGroups`) that the merge algorithm needs to reason
//! about positionally. Every other field on an item or group is preserved
//! losslessly through `extra` without being interpreted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

use crate::error::MergeError;
use crate::model::{ConflictKind, EntityType, ResolutionStrategy};

/// One slot in a session's ranked grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GridItem {
    #[serde(default)]
    pub matched: bool,
    #[serde(default)]
    pub backlog_item_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Json>,
}

/// Per-group UI and field state for a backlog group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BacklogGroupState {
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub is_expanded: bool,
    #[serde(flatten)]
    pub extra: JsonMap<String, Json>,
}

/// Typed view over a session payload's merge-relevant shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionPayload {
    #[serde(default)]
    pub grid_items: Vec<Option<GridItem>>,
    #[serde(default)]
    pub backlog_groups: BTreeMap<String, BacklogGroupState>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Json>,
}

/// A position where local and server both changed to reference different
/// backlog items; the caller may apply a manual per-position override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionalConflict {
    pub position: usize,
    pub local: Option<GridItem>,
    pub server: Option<GridItem>,
}

/// Result of merging two (or three, with a base) grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMergeResult {
    pub merged: Vec<Option<GridItem>>,
    pub conflicts: Vec<PositionalConflict>,
}

/// Result of merging two (or three, with a base) session payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMergeResult {
    pub merged: SessionPayload,
    pub grid_conflicts: Vec<PositionalConflict>,
}

fn item_identity(item: &Option<GridItem>) -> (bool, Option<&str>) {
    match item {
        Some(i) => (i.matched, i.backlog_item_id.as_deref()),
        None => (false, None),
    }
}

fn same_backlog_item(a: &Option<GridItem>, b: &Option<GridItem>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.backlog_item_id.is_some() && x.backlog_item_id == y.backlog_item_id,
        _ => false,
    }
}

fn merge_item_metadata(local: &GridItem, server: &GridItem) -> GridItem {
    let mut tags: Vec<String> = local.tags.iter().cloned().collect();
    for t in &server.tags {
        if !tags.contains(t) {
            tags.push(t.clone());
        }
    }
    let description = match (&local.description, &server.description) {
        (Some(l), _) if !l.is_empty() => Some(l.clone()),
        (_, Some(s)) if !s.is_empty() => Some(s.clone()),
        (Some(l), _) => Some(l.clone()),
        (None, Some(s)) => Some(s.clone()),
        (None, None) => None,
    };
    let mut extra = server.extra.clone();
    for (k, v) in &local.extra {
        extra.entry(k.clone()).or_insert_with(|| v.clone());
    }
    GridItem {
        matched: server.matched || local.matched,
        backlog_item_id: server.backlog_item_id.clone().or_else(|| local.backlog_item_id.clone()),
        tags,
        description,
        extra,
    }
}

/// Positional three-way merge of two grids, per spec §4.5.
#[must_use]
pub fn merge_grid(
    local: &[Option<GridItem>],
    server: &[Option<GridItem>],
    base: Option<&[Option<GridItem>]>,
) -> GridMergeResult {
    let len = local.len().max(server.len());
    let mut merged = Vec::with_capacity(len);
    let mut conflicts = Vec::new();

    for i in 0..len {
        let l = local.get(i).cloned().unwrap_or(None);
        let s = server.get(i).cloned().unwrap_or(None);
        let b = base.and_then(|b| b.get(i)).cloned().unwrap_or(None);

        let local_changed = item_identity(&l) != item_identity(&b);
        let server_changed = item_identity(&s) != item_identity(&b);

        let slot = match (local_changed, server_changed) {
            (false, false) => l.clone().or_else(|| s.clone()),
            (true, false) => l.clone(),
            (false, true) => s.clone(),
            (true, true) => {
                if same_backlog_item(&l, &s) {
                    match (&l, &s) {
                        (Some(lx), Some(sx)) => Some(merge_item_metadata(lx, sx)),
                        _ => s.clone(),
                    }
                } else {
                    conflicts.push(PositionalConflict {
                        position: i,
                        local: l.clone(),
                        server: s.clone(),
                    });
                    s.clone()
                }
            }
        };
        merged.push(slot);
    }

    GridMergeResult { merged, conflicts }
}

fn merge_backlog_groups(
    local: &BTreeMap<String, BacklogGroupState>,
    server: &BTreeMap<String, BacklogGroupState>,
) -> BTreeMap<String, BacklogGroupState> {
    let mut merged = BTreeMap::new();

    for (id, server_group) in server {
        let mut group = server_group.clone();
        if let Some(local_group) = local.get(id) {
            group.is_open = local_group.is_open;
            group.is_expanded = local_group.is_expanded;
        }
        merged.insert(id.clone(), group);
    }
    for (id, local_group) in local {
        merged.entry(id.clone()).or_insert_with(|| local_group.clone());
    }

    merged
}

/// Three-way merge of two session payloads, per spec §4.5.
#[must_use]
pub fn merge_session(
    local: &SessionPayload,
    server: &SessionPayload,
    base: Option<&SessionPayload>,
) -> SessionMergeResult {
    let grid_result = merge_grid(
        &local.grid_items,
        &server.grid_items,
        base.map(|b| b.grid_items.as_slice()),
    );
    let backlog_groups = merge_backlog_groups(&local.backlog_groups, &server.backlog_groups);

    let mut extra = server.extra.clone();
    for (k, v) in &local.extra {
        extra.entry(k.clone()).or_insert_with(|| v.clone());
    }

    SessionMergeResult {
        merged: SessionPayload {
            grid_items: grid_result.merged,
            backlog_groups,
            extra,
        },
        grid_conflicts: grid_result.conflicts,
    }
}

/// Structural (value) equality over opaque JSON, per spec §9: cycles are
/// disallowed by contract, so plain `PartialEq` on `serde_json::Value` is
/// sufficient and exact.
#[must_use]
pub fn deep_equal(a: &Json, b: &Json) -> bool {
    a == b
}

/// Detects whether a local/server pair (with an optional common ancestor)
/// constitutes a conflict, per spec §4.5.
///
/// Both sides missing is not itself in the spec's literal wording, but is
/// resolved here as "no conflict" (both ends already agree the entity is
/// gone) rather than raising a spurious delete/delete conflict.
#[must_use]
pub fn has_conflict(local: Option<&Json>, server: Option<&Json>, base: Option<&Json>) -> bool {
    match (local, server) {
        (None, None) => false,
        (None, Some(_)) | (Some(_), None) => true,
        (Some(l), Some(s)) => {
            if deep_equal(l, s) {
                return false;
            }
            match base {
                Some(b) => !deep_equal(l, b) && !deep_equal(s, b),
                None => {
                    tracing::debug!("no common ancestor supplied, assuming conflict");
                    true
                }
            }
        }
    }
}

/// Classifies a detected conflict by which side is missing.
///
/// Naming follows the recommendation table of spec §4.5 (`update_delete`
/// keeps the side that still has data when *local* updated and *server*
/// deleted; `delete_update` is the mirror). See DESIGN.md for why this
/// differs from the literal parenthetical in spec §8 scenario 6, which
/// mislabels the case it describes.
#[must_use]
pub fn classify(local: Option<&Json>, server: Option<&Json>) -> ConflictKind {
    match (local.is_none(), server.is_none()) {
        (false, true) => ConflictKind::UpdateDelete,
        (true, false) => ConflictKind::DeleteUpdate,
        _ => ConflictKind::UpdateUpdate,
    }
}

/// Recommends an automatic resolution strategy for a classified conflict.
#[must_use]
pub fn recommended_strategy(kind: ConflictKind, entity_type: EntityType) -> ResolutionStrategy {
    match kind {
        ConflictKind::UpdateDelete => ResolutionStrategy::LocalWins,
        ConflictKind::DeleteUpdate => ResolutionStrategy::ServerWins,
        ConflictKind::UpdateUpdate => match entity_type {
            EntityType::Session | EntityType::Grid => ResolutionStrategy::Merge,
            EntityType::Backlog => ResolutionStrategy::ServerWins,
        },
    }
}

/// Resolves a conflict by strategy, producing the final payload.
///
/// `merge` dispatches to [`merge_session`] or [`merge_grid`] (serialized back
/// to JSON) depending on `entity_type`; for entity types with no merge
/// strategy it falls back to `server_wins`, matching the "new entity types
/// add a merge strategy... no changes elsewhere" extensibility note.
///
/// # Errors
///
/// Returns [`MergeError::ManualResolutionRequired`] for `Manual`, and
/// [`MergeError::NothingToMerge`] if both sides are absent.
pub fn resolve(
    strategy: ResolutionStrategy,
    local: Option<&Json>,
    server: Option<&Json>,
    base: Option<&Json>,
    kind: ConflictKind,
    entity_type: EntityType,
) -> Result<Json, MergeError> {
    match strategy {
        ResolutionStrategy::LocalWins => local.cloned().ok_or(MergeError::NothingToMerge),
        ResolutionStrategy::ServerWins => server.cloned().ok_or(MergeError::NothingToMerge),
        ResolutionStrategy::Manual => {
            tracing::warn!(?kind, ?entity_type, "manual resolution required, refusing to guess");
            Err(MergeError::ManualResolutionRequired { kind })
        }
        ResolutionStrategy::Merge => {
            let (Some(l), Some(s)) = (local, server) else {
                return Err(MergeError::NothingToMerge);
            };
            match entity_type {
                EntityType::Session => {
                    let lp: SessionPayload = serde_json::from_value(l.clone()).unwrap_or_default();
                    let sp: SessionPayload = serde_json::from_value(s.clone()).unwrap_or_default();
                    let bp: Option<SessionPayload> =
                        base.and_then(|b| serde_json::from_value(b.clone()).ok());
                    let result = merge_session(&lp, &sp, bp.as_ref());
                    Ok(serde_json::to_value(result.merged).expect("SessionPayload serializes"))
                }
                EntityType::Grid => {
                    let lg: Vec<Option<GridItem>> =
                        serde_json::from_value(l.clone()).unwrap_or_default();
                    let sg: Vec<Option<GridItem>> =
                        serde_json::from_value(s.clone()).unwrap_or_default();
                    let bg: Option<Vec<Option<GridItem>>> =
                        base.and_then(|b| serde_json::from_value(b.clone()).ok());
                    let result = merge_grid(&lg, &sg, bg.as_deref());
                    Ok(serde_json::to_value(result.merged).expect("grid serializes"))
                }
                EntityType::Backlog => Ok(s.clone()),
            }
        }
    }
}
