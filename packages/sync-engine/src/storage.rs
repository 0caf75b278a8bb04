//! Durable (or degraded in-memory) persistence across the five logical
//! stores of spec §6.2: sessions, syncQueue, metadata, conflicts, backlogCache.
//!
//! [`InMemoryDurableStore`] is backed by [`DashMap`], the same concurrent
//! hash map the teacher's storage engine uses for its lock-free read path --
//! here it doubles as both the production backend (this engine has no
//! platform-native durable store to bind to) and the *degraded-ok* fallback
//! spec §4.1 requires when durable storage is unavailable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use offline_core::{
    BacklogCacheEntry, ConflictRecord, MetadataEntry, Operation, OperationStatus,
    ResolutionStrategy, SessionRecord,
};
use serde_json::Value as Json;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StorageError;

/// Events emitted by a [`DurableStore`], per spec §4.1/§8.
#[derive(Debug, Clone)]
pub enum StorageEvent {
    SessionSaved { list_id: String, at: u64 },
    SessionDeleted { list_id: String, at: u64 },
    QueueChanged { at: u64 },
    ConflictAdded { id: Uuid, at: u64 },
    ConflictResolved { id: Uuid, at: u64 },
    StorageError { message: String, at: u64 },
}

/// Versioned key/value persistence across the engine's five logical stores.
///
/// Every operation is a failable scoped acquisition: implementations must
/// discard partial writes on error rather than leaving a store half-updated.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save_session(&self, list_id: &str, data: Json, now: u64) -> Result<SessionRecord, StorageError>;
    async fn get_session(&self, list_id: &str) -> Result<Option<SessionRecord>, StorageError>;
    async fn get_all_sessions(&self) -> Result<Vec<SessionRecord>, StorageError>;
    async fn get_dirty_sessions(&self) -> Result<Vec<SessionRecord>, StorageError>;
    async fn mark_session_synced(&self, list_id: &str, server_version: u64, now: u64) -> Result<(), StorageError>;
    async fn delete_session(&self, list_id: &str, now: u64) -> Result<(), StorageError>;

    async fn enqueue(&self, op: Operation) -> Result<(), StorageError>;
    async fn get_all_operations(&self) -> Result<Vec<Operation>, StorageError>;
    async fn get_pending(&self) -> Result<Vec<Operation>, StorageError>;
    async fn update_operation(&self, op: Operation) -> Result<(), StorageError>;
    async fn remove_operation(&self, id: Uuid) -> Result<(), StorageError>;
    async fn count_operations(&self) -> Result<usize, StorageError>;
    async fn find_pending_coalesce_target(
        &self,
        entity_type: offline_core::EntityType,
        entity_id: &str,
        op_type: offline_core::OperationType,
    ) -> Result<Option<Operation>, StorageError>;

    async fn add_conflict(&self, conflict: ConflictRecord) -> Result<(), StorageError>;
    async fn get_conflict(&self, id: Uuid) -> Result<Option<ConflictRecord>, StorageError>;
    async fn get_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError>;
    async fn get_resolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError>;
    async fn remove_conflict(&self, id: Uuid) -> Result<(), StorageError>;
    async fn resolve_conflict(
        &self,
        id: Uuid,
        resolution: ResolutionStrategy,
        data: Json,
        now: u64,
    ) -> Result<(), StorageError>;

    async fn set_metadata(&self, key: &str, value: Json) -> Result<(), StorageError>;
    async fn get_metadata(&self, key: &str) -> Result<Option<Json>, StorageError>;

    async fn cache_backlog(&self, cache_id: &str, items: Json, now: u64, ttl_ms: u64) -> Result<(), StorageError>;
    async fn get_backlog_cache(&self, cache_id: &str, ignore_expiry: bool, now: u64) -> Result<Option<Json>, StorageError>;
    async fn prune_expired_backlog(&self, now: u64) -> Result<usize, StorageError>;
    async fn clear_backlog(&self, cache_id: &str) -> Result<(), StorageError>;
    async fn clear_all_backlog(&self) -> Result<(), StorageError>;

    /// Approximate bytes currently occupied across all five stores.
    async fn estimated_usage_bytes(&self) -> Result<u64, StorageError>;

    /// Drops every record from every store. Must be called explicitly.
    async fn clear_all(&self) -> Result<(), StorageError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

fn estimate_cost<T: serde::Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0)
}

/// In-memory [`DurableStore`]. Used both as the engine's production backend
/// and as the degraded-mode fallback: initialization never fails, so there
/// is no separate "unavailable" branch to model here.
pub struct InMemoryDurableStore {
    sessions: DashMap<String, SessionRecord>,
    queue: DashMap<Uuid, Operation>,
    metadata: DashMap<String, MetadataEntry>,
    conflicts: DashMap<Uuid, ConflictRecord>,
    backlog: DashMap<String, BacklogCacheEntry>,
    usage_bytes: AtomicU64,
    events: broadcast::Sender<StorageEvent>,
}

impl InMemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            sessions: DashMap::new(),
            queue: DashMap::new(),
            metadata: DashMap::new(),
            conflicts: DashMap::new(),
            backlog: DashMap::new(),
            usage_bytes: AtomicU64::new(0),
            events,
        }
    }

    fn track_add(&self, bytes: u64) {
        self.usage_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn track_remove(&self, bytes: u64) {
        self.usage_bytes.fetch_sub(bytes.min(self.usage_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    }

    fn emit(&self, event: StorageEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn save_session(&self, list_id: &str, data: Json, now: u64) -> Result<SessionRecord, StorageError> {
        let record = match self.sessions.get(list_id) {
            Some(existing) => {
                let mut r = existing.clone();
                self.track_remove(estimate_cost(&r));
                r.apply_local_edit(data, now);
                r
            }
            None => SessionRecord::new(list_id, data, now),
        };
        self.track_add(estimate_cost(&record));
        self.sessions.insert(list_id.to_string(), record.clone());
        self.emit(StorageEvent::SessionSaved { list_id: list_id.to_string(), at: now });
        Ok(record)
    }

    async fn get_session(&self, list_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self.sessions.get(list_id).map(|r| r.clone()))
    }

    async fn get_all_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        Ok(self.sessions.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_dirty_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        Ok(self.sessions.iter().filter(|r| r.is_dirty).map(|r| r.value().clone()).collect())
    }

    async fn mark_session_synced(&self, list_id: &str, server_version: u64, now: u64) -> Result<(), StorageError> {
        let mut entry = self.sessions.get_mut(list_id).ok_or_else(|| StorageError::SessionNotFound {
            list_id: list_id.to_string(),
        })?;
        entry.mark_synced(server_version, now);
        Ok(())
    }

    async fn delete_session(&self, list_id: &str, now: u64) -> Result<(), StorageError> {
        if let Some((_, record)) = self.sessions.remove(list_id) {
            self.track_remove(estimate_cost(&record));
        }
        self.emit(StorageEvent::SessionDeleted { list_id: list_id.to_string(), at: now });
        Ok(())
    }

    async fn enqueue(&self, op: Operation) -> Result<(), StorageError> {
        self.track_add(estimate_cost(&op));
        self.queue.insert(op.id, op);
        self.emit(StorageEvent::QueueChanged { at: 0 });
        Ok(())
    }

    async fn get_all_operations(&self) -> Result<Vec<Operation>, StorageError> {
        Ok(self.queue.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_pending(&self) -> Result<Vec<Operation>, StorageError> {
        let mut pending: Vec<Operation> = self
            .queue
            .iter()
            .filter(|r| r.status == OperationStatus::Pending)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.timestamp.cmp(&b.timestamp)));
        Ok(pending)
    }

    async fn update_operation(&self, op: Operation) -> Result<(), StorageError> {
        if let Some(mut existing) = self.queue.get_mut(&op.id) {
            self.track_remove(estimate_cost(&*existing));
            self.track_add(estimate_cost(&op));
            *existing = op;
        } else {
            self.track_add(estimate_cost(&op));
            self.queue.insert(op.id, op);
        }
        self.emit(StorageEvent::QueueChanged { at: 0 });
        Ok(())
    }

    async fn remove_operation(&self, id: Uuid) -> Result<(), StorageError> {
        if let Some((_, op)) = self.queue.remove(&id) {
            self.track_remove(estimate_cost(&op));
        }
        self.emit(StorageEvent::QueueChanged { at: 0 });
        Ok(())
    }

    async fn count_operations(&self) -> Result<usize, StorageError> {
        Ok(self.queue.len())
    }

    async fn find_pending_coalesce_target(
        &self,
        entity_type: offline_core::EntityType,
        entity_id: &str,
        op_type: offline_core::OperationType,
    ) -> Result<Option<Operation>, StorageError> {
        Ok(self
            .queue
            .iter()
            .find(|r| {
                r.status == OperationStatus::Pending
                    && r.entity_type == entity_type
                    && r.entity_id == entity_id
                    && r.op_type == op_type
            })
            .map(|r| r.value().clone()))
    }

    async fn add_conflict(&self, conflict: ConflictRecord) -> Result<(), StorageError> {
        let at = conflict.created_at;
        let id = conflict.id;
        self.track_add(estimate_cost(&conflict));
        self.conflicts.insert(id, conflict);
        self.emit(StorageEvent::ConflictAdded { id, at });
        Ok(())
    }

    async fn get_conflict(&self, id: Uuid) -> Result<Option<ConflictRecord>, StorageError> {
        Ok(self.conflicts.get(&id).map(|r| r.clone()))
    }

    async fn get_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        Ok(self
            .conflicts
            .iter()
            .filter(|r| r.resolved_at.is_none())
            .map(|r| r.value().clone())
            .collect())
    }

    async fn get_resolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        Ok(self
            .conflicts
            .iter()
            .filter(|r| r.resolved_at.is_some())
            .map(|r| r.value().clone())
            .collect())
    }

    async fn remove_conflict(&self, id: Uuid) -> Result<(), StorageError> {
        if let Some((_, conflict)) = self.conflicts.remove(&id) {
            self.track_remove(estimate_cost(&conflict));
        }
        Ok(())
    }

    async fn resolve_conflict(
        &self,
        id: Uuid,
        resolution: ResolutionStrategy,
        data: Json,
        now: u64,
    ) -> Result<(), StorageError> {
        let mut entry = self
            .conflicts
            .get_mut(&id)
            .ok_or(StorageError::ConflictNotFound { id })?;
        entry.resolution = Some(resolution);
        entry.resolved_data = Some(data);
        entry.resolved_at = Some(now);
        drop(entry);
        self.emit(StorageEvent::ConflictResolved { id, at: now });
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: Json) -> Result<(), StorageError> {
        if let Some(existing) = self.metadata.get(key) {
            self.track_remove(estimate_cost(&*existing));
        }
        let entry = MetadataEntry { key: key.to_string(), value };
        self.track_add(estimate_cost(&entry));
        self.metadata.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Json>, StorageError> {
        Ok(self.metadata.get(key).map(|r| r.value.clone()))
    }

    async fn cache_backlog(&self, cache_id: &str, items: Json, now: u64, ttl_ms: u64) -> Result<(), StorageError> {
        let entry = BacklogCacheEntry {
            cache_id: cache_id.to_string(),
            items,
            cached_at: now,
            expires_at: now + ttl_ms,
        };
        self.track_add(estimate_cost(&entry));
        self.backlog.insert(cache_id.to_string(), entry);
        Ok(())
    }

    async fn get_backlog_cache(&self, cache_id: &str, ignore_expiry: bool, now: u64) -> Result<Option<Json>, StorageError> {
        Ok(self.backlog.get(cache_id).and_then(|entry| {
            if ignore_expiry || !entry.is_expired(now) {
                Some(entry.items.clone())
            } else {
                None
            }
        }))
    }

    async fn prune_expired_backlog(&self, now: u64) -> Result<usize, StorageError> {
        let expired: Vec<String> = self
            .backlog
            .iter()
            .filter(|r| r.is_expired(now))
            .map(|r| r.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            if let Some((_, entry)) = self.backlog.remove(&key) {
                self.track_remove(estimate_cost(&entry));
            }
        }
        Ok(count)
    }

    async fn clear_backlog(&self, cache_id: &str) -> Result<(), StorageError> {
        if let Some((_, entry)) = self.backlog.remove(cache_id) {
            self.track_remove(estimate_cost(&entry));
        }
        Ok(())
    }

    async fn clear_all_backlog(&self) -> Result<(), StorageError> {
        self.backlog.clear();
        Ok(())
    }

    async fn estimated_usage_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.usage_bytes.load(Ordering::Relaxed))
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.sessions.clear();
        self.queue.clear();
        self.metadata.clear();
        self.conflicts.clear();
        self.backlog.clear();
        self.usage_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// Shared handle alias used throughout the orchestration layer.
pub type SharedStore = Arc<dyn DurableStore>;
