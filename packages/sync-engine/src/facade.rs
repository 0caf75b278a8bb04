//! Single entry point applications hold onto, per spec §4.7.
//!
//! Debounces rapid session edits before they hit the queue, and flattens the
//! engine's internal component events into one reactive [`Snapshot`] stream.

use std::sync::Arc;
use std::time::Duration;

use offline_core::{ConflictRecord, EntityType, ResolutionStrategy};
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SyncError;
use crate::network::NetworkState;
use crate::storage::SharedStore;
use crate::sync_engine::{SyncEngine, SyncResult, SyncStatus};

/// Flattened view of engine state, suitable for driving UI.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub is_online: bool,
    pub is_offline: bool,
    pub is_slow: bool,
    pub is_syncing: bool,
    pub has_pending_changes: bool,
    pub pending_count: usize,
    pub last_synced_at: Option<u64>,
    pub has_conflicts: bool,
    pub conflicts: Vec<ConflictRecord>,
}

struct DebounceState {
    handle: Option<JoinHandle<()>>,
}

/// The facade applications hold: debounced writes in, a reactive snapshot out.
pub struct Facade {
    store: SharedStore,
    engine: Arc<SyncEngine>,
    debounce_ms: u64,
    pending_saves: Mutex<std::collections::HashMap<String, DebounceState>>,
}

impl Facade {
    #[must_use]
    pub fn new(store: SharedStore, engine: Arc<SyncEngine>, debounce_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            debounce_ms,
            pending_saves: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub async fn init(self: &Arc<Self>) -> Result<(), SyncError> {
        self.engine.init().await
    }

    /// Flattened reactive snapshot. Re-derived from engine/network state on
    /// every call rather than cached, since callers typically poll it from a
    /// UI re-render rather than subscribing to a stream directly.
    pub fn snapshot(&self, network: NetworkState, state: &crate::sync_engine::SyncState) -> Snapshot {
        Snapshot {
            is_online: network == NetworkState::Online,
            is_offline: network == NetworkState::Offline,
            is_slow: network == NetworkState::Slow,
            is_syncing: state.status == SyncStatus::Syncing,
            has_pending_changes: state.pending_changes > 0,
            pending_count: state.pending_changes,
            last_synced_at: state.last_synced_at,
            has_conflicts: !state.conflicts.is_empty(),
            conflicts: state.conflicts.clone(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<crate::sync_engine::SyncState> {
        self.engine.subscribe()
    }

    /// Writes the session immediately, then schedules a debounced enqueue so
    /// a burst of edits to the same list collapses to one queued operation,
    /// per spec §4.4/§8 scenario 2.
    pub async fn save_session(self: &Arc<Self>, list_id: &str, data: Json) -> Result<(), SyncError> {
        let now = self.engine.now_millis();
        self.store.save_session(list_id, data.clone(), now).await.map_err(SyncError::Storage)?;

        let mut pending = self.pending_saves.lock();
        if let Some(existing) = pending.get_mut(list_id) {
            if let Some(handle) = existing.handle.take() {
                handle.abort();
            }
        }

        let facade = Arc::clone(self);
        let list_id_owned = list_id.to_string();
        let delay = Duration::from_millis(self.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = facade.flush_session(&list_id_owned, data).await;
            facade.pending_saves.lock().remove(&list_id_owned);
        });
        pending.insert(list_id.to_string(), DebounceState { handle: Some(handle) });
        Ok(())
    }

    async fn flush_session(self: &Arc<Self>, list_id: &str, data: Json) -> Result<(), SyncError> {
        let now = self.engine.now_millis();
        self.engine
            .queue()
            .enqueue_session_update(list_id, data, now, 0)
            .await
            .map_err(SyncError::Storage)?;

        if self.engine.sensor().current_state() != NetworkState::Offline {
            self.engine.force_sync().await?;
        }
        Ok(())
    }

    /// Bypasses the debounce window and enqueues immediately.
    pub async fn force_save(self: &Arc<Self>, list_id: &str, data: Json) -> Result<(), SyncError> {
        {
            let mut pending = self.pending_saves.lock();
            if let Some(existing) = pending.remove(list_id) {
                if let Some(handle) = existing.handle {
                    handle.abort();
                }
            }
        }
        let now = self.engine.now_millis();
        self.store.save_session(list_id, data.clone(), now).await.map_err(SyncError::Storage)?;
        self.flush_session(list_id, data).await
    }

    pub async fn load_session(&self, list_id: &str) -> Result<Option<offline_core::SessionRecord>, SyncError> {
        self.store.get_session(list_id).await.map_err(SyncError::Storage)
    }

    pub async fn delete_session(self: &Arc<Self>, list_id: &str) -> Result<(), SyncError> {
        let now = self.engine.now_millis();
        self.store.delete_session(list_id, now).await.map_err(SyncError::Storage)?;
        let op = offline_core::Operation::new(
            offline_core::OperationType::DeleteSession,
            EntityType::Session,
            list_id,
            Json::Null,
            now,
            10,
            self.engine.config().max_retries,
        );
        self.engine.queue().enqueue(op).await.map_err(SyncError::Storage)
    }

    pub async fn sync_now(self: &Arc<Self>) -> Result<SyncResult, SyncError> {
        self.engine.force_sync().await
    }

    pub async fn sync_entity(self: &Arc<Self>, entity_type: EntityType, entity_id: &str) -> Result<SyncResult, SyncError> {
        self.engine.sync_entity(entity_type, entity_id).await
    }

    pub async fn retry_failed(&self) -> Result<u32, SyncError> {
        self.engine.retry_failed().await
    }

    pub async fn clear_sync_queue(&self) -> Result<(), SyncError> {
        self.engine.clear_sync_queue().await
    }

    pub async fn resolve_conflict(
        self: &Arc<Self>,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_data: Option<Json>,
    ) -> Result<(), SyncError> {
        self.engine.resolve_conflict(conflict_id, strategy, merged_data).await
    }

    pub fn stop(&self) {
        self.engine.stop();
        let mut pending = self.pending_saves.lock();
        for (_, state) in pending.drain() {
            if let Some(handle) = state.handle {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::network::NetworkSensor;
    use crate::quota::QuotaGovernor;
    use crate::queue::{ExecutorOutcome, RemoteExecutor, ScriptedExecutor};
    use crate::storage::InMemoryDurableStore;
    use serde_json::json;

    fn facade_with(executor: Arc<dyn RemoteExecutor>) -> Arc<Facade> {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let sensor = Arc::new(NetworkSensor::new(true, 1_000));
        let config = OfflineConfig::default();
        let quota = Arc::new(QuotaGovernor::new(store.clone(), 100_000_000, &config));
        let engine = SyncEngine::new(store.clone(), executor, sensor, quota, config);
        Facade::new(store, engine, 20)
    }

    #[tokio::test]
    async fn save_session_is_visible_immediately_even_before_debounce_fires() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let facade = facade_with(executor);
        facade.init().await.unwrap();

        facade.save_session("L", json!({"v": 1})).await.unwrap();
        let loaded = facade.load_session("L").await.unwrap().unwrap();
        assert_eq!(loaded.data, json!({"v": 1}));
    }

    #[tokio::test]
    async fn burst_saves_debounce_to_a_single_queued_operation_and_drains_while_online() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let facade = facade_with(executor);
        facade.init().await.unwrap();

        for v in 1..=5 {
            facade.save_session("L", json!({"v": v})).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        // The burst collapses to a single queued operation, and since the
        // network is online the debounced flush drains it immediately.
        assert_eq!(facade.engine.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn burst_saves_stay_queued_while_offline() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let sensor = Arc::new(NetworkSensor::new(false, 1_000));
        let config = OfflineConfig::default();
        let quota = Arc::new(QuotaGovernor::new(store.clone(), 100_000_000, &config));
        let engine = SyncEngine::new(store.clone(), executor, sensor, quota, config);
        let facade = Facade::new(store, engine, 20);
        facade.init().await.unwrap();

        for v in 1..=5 {
            facade.save_session("L", json!({"v": v})).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(facade.engine.queue().pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn force_save_bypasses_debounce() {
        // No outcomes scripted: if the debounce timer were still pending and
        // fired anyway, the executor would panic on an unscripted call.
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![]));
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let sensor = Arc::new(NetworkSensor::new(false, 1_000));
        let config = OfflineConfig::default();
        let quota = Arc::new(QuotaGovernor::new(store.clone(), 100_000_000, &config));
        let engine = SyncEngine::new(store.clone(), executor, sensor, quota, config);
        let facade = Facade::new(store, engine, 20);
        facade.init().await.unwrap();

        facade.force_save("L", json!({"v": 1})).await.unwrap();
        assert_eq!(facade.engine.queue().pending_count().await.unwrap(), 1);
    }
}
