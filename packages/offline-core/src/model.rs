//! Entity types shared by every layer of the offline-sync engine.
//!
//! Payloads are opaque [`serde_json::Value`], matching the `application/json`
//! wire contract the engine speaks to the remote authority: neither this
//! crate nor `sync-engine` ever interprets the shape of a session or grid
//! payload, only its presence and identity.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// A user's session, mirrored from the remote authority and mutated locally
/// while offline.
///
/// Invariant: `is_dirty == (local_version > server_version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub list_id: String,
    pub data: Json,
    pub local_version: u64,
    pub server_version: u64,
    pub last_modified: u64,
    pub last_synced: Option<u64>,
    pub is_dirty: bool,
}

impl SessionRecord {
    #[must_use]
    pub fn new(list_id: impl Into<String>, data: Json, now: u64) -> Self {
        Self {
            list_id: list_id.into(),
            data,
            local_version: 1,
            server_version: 0,
            last_modified: now,
            last_synced: None,
            is_dirty: true,
        }
    }

    /// Applies a local mutation: bumps `local_version`, marks dirty, stamps `now`.
    pub fn apply_local_edit(&mut self, data: Json, now: u64) {
        self.data = data;
        self.local_version += 1;
        self.last_modified = now;
        self.is_dirty = true;
    }

    /// Marks the record synced up to `server_version` as of `now`.
    pub fn mark_synced(&mut self, server_version: u64, now: u64) {
        self.server_version = server_version;
        self.last_synced = Some(now);
        self.is_dirty = false;
    }
}

/// What an [`Operation`] intends to change upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    CreateSession,
    UpdateSession,
    DeleteSession,
    UpdateGrid,
    UpdateBacklog,
}

/// What kind of entity an [`Operation`] or [`ConflictRecord`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Session,
    Grid,
    Backlog,
}

/// Lifecycle state of a queued [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Conflict,
}

/// Snapshot of version/timing state captured when an operation escalates to
/// a conflict, so the conflict can be re-examined after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSnapshot {
    pub local_version: u64,
    pub server_version: u64,
    pub local_timestamp: u64,
    pub server_timestamp: u64,
}

/// One atomic intention to push to the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub op_type: OperationType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: Json,
    pub timestamp: u64,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: i32,
    pub last_error: Option<String>,
    pub conflict_snapshot: Option<ConflictSnapshot>,
}

impl Operation {
    #[must_use]
    pub fn new(
        op_type: OperationType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Json,
        timestamp: u64,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            op_type,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            timestamp,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries,
            priority,
            last_error: None,
            conflict_snapshot: None,
        }
    }

    /// Whether this operation coalesces with other pending updates to the
    /// same entity (grid updates carry position-indexed edits and never
    /// coalesce: order matters).
    #[must_use]
    pub fn coalesces(&self) -> bool {
        matches!(self.op_type, OperationType::UpdateSession | OperationType::UpdateBacklog)
    }
}

/// Kind of divergence detected between a local and server value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    UpdateUpdate,
    UpdateDelete,
    DeleteUpdate,
}

/// A strategy for resolving a [`ConflictRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LocalWins,
    ServerWins,
    Merge,
    Manual,
}

/// One detected divergence between a local and server value for the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: ConflictKind,
    pub local_data: Option<Json>,
    pub server_data: Option<Json>,
    pub base_data: Option<Json>,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
    pub resolution: Option<ResolutionStrategy>,
    pub resolved_data: Option<Json>,
}

impl ConflictRecord {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A read-through cache entry for reference data browsed offline.
///
/// Pure cache: evictable at any time without semantic loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogCacheEntry {
    pub cache_id: String,
    pub items: Json,
    pub cached_at: u64,
    pub expires_at: u64,
}

impl BacklogCacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// A small key/value entry for engine bookkeeping (never user-visible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Json,
}
