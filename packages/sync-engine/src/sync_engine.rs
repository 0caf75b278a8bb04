//! The orchestrator: drives the queue against the remote authority, fed by
//! the network sensor's transitions, integrating quota governance and
//! conflict resolution, per spec §4.6.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use offline_core::{ClockSource, ConflictRecord, EntityType, ResolutionStrategy, SystemClock};
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use async_trait::async_trait;

use crate::config::OfflineConfig;
use crate::error::SyncError;
use crate::network::{NetworkSensor, NetworkState};
use crate::queue::{DrainResult, OperationQueue, RemoteExecutor};
use crate::quota::QuotaGovernor;
use crate::storage::SharedStore;

/// Host-platform hook for registering/unregistering this engine with a
/// background-sync facility (e.g. a service worker's periodic sync, or a
/// mobile OS's background task scheduler), per spec §6.3.
///
/// The engine never relies on the registration succeeding: background sync
/// is best-effort wake-up plumbing, not a correctness requirement, so a host
/// that doesn't support it can leave the default [`NoopBackgroundSyncPort`]
/// in place.
#[async_trait]
pub trait BackgroundSyncPort: Send + Sync {
    async fn register(&self, tag: &str) -> Result<(), SyncError>;
    async fn unregister(&self, tag: &str) -> Result<(), SyncError>;
}

/// Default port for hosts with no background-sync facility to integrate.
pub struct NoopBackgroundSyncPort;

#[async_trait]
impl BackgroundSyncPort for NoopBackgroundSyncPort {
    async fn register(&self, _tag: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn unregister(&self, _tag: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Pending,
    Error,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<u64>,
    pub pending_changes: usize,
    pub current_operation: Option<Uuid>,
    pub error: Option<String>,
    pub conflicts: Vec<ConflictRecord>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_synced_at: None,
            pending_changes: 0,
            current_operation: None,
            error: None,
            conflicts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    pub synced: u32,
    pub failed: u32,
    pub conflicts: Vec<Uuid>,
    pub duration_ms: u64,
}

impl From<DrainResult> for SyncResult {
    fn from(d: DrainResult) -> Self {
        Self {
            success: d.failed == 0,
            synced: d.successful,
            failed: d.failed,
            conflicts: d.conflicts,
            duration_ms: d.duration_ms,
        }
    }
}

const METADATA_LAST_SYNC_TIME: &str = "lastSyncTime";

/// Owns the single [`SyncState`] for one engine instance and coordinates
/// every other component, per the DAG in spec §9: Facade -> SyncEngine ->
/// {OperationQueue, ConflictEngine, NetworkSensor, QuotaGovernor} -> DurableStore.
pub struct SyncEngine {
    store: SharedStore,
    queue: Arc<OperationQueue>,
    sensor: Arc<NetworkSensor>,
    quota: Arc<QuotaGovernor>,
    config: OfflineConfig,
    clock: Arc<dyn ClockSource>,
    state_tx: watch::Sender<SyncState>,
    retry_timers: DashMap<Uuid, JoinHandle<()>>,
    periodic_task: Mutex<Option<JoinHandle<()>>>,
    connectivity_task: Mutex<Option<JoinHandle<()>>>,
    last_sync_attempt_ms: AtomicU64,
    currently_syncing: AtomicBool,
    initialized: AtomicBool,
    background_sync: Mutex<Arc<dyn BackgroundSyncPort>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        store: SharedStore,
        executor: Arc<dyn RemoteExecutor>,
        sensor: Arc<NetworkSensor>,
        quota: Arc<QuotaGovernor>,
        config: OfflineConfig,
    ) -> Arc<Self> {
        let queue = Arc::new(OperationQueue::new(store.clone(), executor, config.clone()));
        let (state_tx, _rx) = watch::channel(SyncState::default());
        Arc::new(Self {
            store,
            queue,
            sensor,
            quota,
            config,
            clock: Arc::new(SystemClock),
            state_tx,
            retry_timers: DashMap::new(),
            periodic_task: Mutex::new(None),
            connectivity_task: Mutex::new(None),
            last_sync_attempt_ms: AtomicU64::new(0),
            currently_syncing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            background_sync: Mutex::new(Arc::new(NoopBackgroundSyncPort)),
        })
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    #[must_use]
    pub fn sensor(&self) -> &Arc<NetworkSensor> {
        &self.sensor
    }

    /// Overrides the background-sync integration used by [`Self::init`]/[`Self::stop`].
    /// Must be called before `init` to take effect on the initial registration.
    pub fn set_background_sync_port(&self, port: Arc<dyn BackgroundSyncPort>) {
        *self.background_sync.lock() = port;
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        let mut state = self.state_tx.borrow().clone();
        f(&mut state);
        let _ = self.state_tx.send(state);
    }

    /// Wires the queue executor, subscribes to the network sensor, starts
    /// the periodic drain if online, and hydrates state from the durable store.
    pub async fn init(self: &Arc<Self>) -> Result<(), SyncError> {
        self.initialized.store(true, Ordering::SeqCst);
        self.hydrate().await?;

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.watch_connectivity().await });
        *self.connectivity_task.lock() = Some(handle);

        if self.sensor.current_state() != NetworkState::Offline {
            self.start_periodic();
        }

        if self.config.use_background_sync {
            let port = self.background_sync.lock().clone();
            port.register(crate::config::BACKGROUND_SYNC_TAG).await?;
        }
        Ok(())
    }

    async fn hydrate(&self) -> Result<(), SyncError> {
        let pending = self.queue.pending_count().await.map_err(SyncError::Storage)?;
        let last_synced = self
            .store
            .get_metadata(METADATA_LAST_SYNC_TIME)
            .await
            .map_err(SyncError::Storage)?
            .and_then(|v| v.as_u64());
        let conflicts = self.store.get_unresolved_conflicts().await.map_err(SyncError::Storage)?;

        let status = if !conflicts.is_empty() {
            SyncStatus::Conflict
        } else if pending > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Idle
        };

        self.update_state(|s| {
            s.pending_changes = pending;
            s.last_synced_at = last_synced;
            s.conflicts = conflicts;
            s.status = status;
        });
        Ok(())
    }

    async fn watch_connectivity(self: Arc<Self>) {
        let mut rx = self.sensor.subscribe();
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let state = *rx.borrow();
            match state {
                NetworkState::Offline => {
                    self.stop_periodic();
                    let pending = self.queue.pending_count().await.unwrap_or(0);
                    self.update_state(|s| {
                        s.status = if pending > 0 { SyncStatus::Pending } else { SyncStatus::Idle };
                    });
                }
                NetworkState::Online | NetworkState::Slow => {
                    self.start_periodic();
                    if self.config.auto_sync_on_reconnect {
                        let pending = self.queue.pending_count().await.unwrap_or(0);
                        if pending > 0 {
                            let now = self.clock.now_millis();
                            let _ = self.sync(now, false).await;
                        }
                    }
                }
            }
        }
    }

    fn start_periodic(self: &Arc<Self>) {
        self.stop_periodic();
        let engine = Arc::clone(self);
        let interval = Duration::from_millis(self.config.sync_interval_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let pending = engine.queue.pending_count().await.unwrap_or(0);
                if pending > 0 {
                    let now = engine.clock.now_millis();
                    let _ = engine.sync(now, false).await;
                }
            }
        });
        *self.periodic_task.lock() = Some(handle);
    }

    fn stop_periodic(&self) {
        if let Some(handle) = self.periodic_task.lock().take() {
            handle.abort();
        }
    }

    /// Cancels all background activity: periodic drain, connectivity watch,
    /// and every outstanding retry timer.
    pub fn stop(&self) {
        self.stop_periodic();
        if let Some(handle) = self.connectivity_task.lock().take() {
            handle.abort();
        }
        for entry in self.retry_timers.iter() {
            entry.value().abort();
        }
        self.retry_timers.clear();

        if self.config.use_background_sync {
            let port = self.background_sync.lock().clone();
            tokio::spawn(async move {
                let _ = port.unregister(crate::config::BACKGROUND_SYNC_TAG).await;
            });
        }
    }

    fn schedule_retries(self: &Arc<Self>, retry_after: Vec<(Uuid, Duration)>) {
        for (op_id, delay) in retry_after {
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.retry_timers.remove(&op_id);
                let now = engine.clock.now_millis();
                let _ = engine.queue.process_queue(now).await;
            });
            self.retry_timers.insert(op_id, handle);
        }
    }

    /// Drives one drain pass against the remote authority.
    ///
    /// Short-circuits with a zero-op, `success=false` result (never an
    /// error) when offline, already syncing, or inside the min-interval
    /// throttle window -- matching spec §7's "offline attempt to sync never
    /// throws". Calling before [`Self::init`] is a programmer error and does
    /// throw.
    pub async fn sync(self: &Arc<Self>, now: u64, force: bool) -> Result<SyncResult, SyncError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SyncError::NotInitialized);
        }
        if self.sensor.current_state() == NetworkState::Offline {
            return Ok(SyncResult::default());
        }
        if !force {
            let last = self.last_sync_attempt_ms.load(Ordering::SeqCst);
            if now.saturating_sub(last) < self.config.min_sync_interval_ms {
                return Ok(SyncResult::default());
            }
        }
        if self.currently_syncing.swap(true, Ordering::SeqCst) {
            return Ok(SyncResult::default());
        }

        self.last_sync_attempt_ms.store(now, Ordering::SeqCst);
        self.update_state(|s| s.status = SyncStatus::Syncing);

        let outcome = self.run_sync(now).await;
        self.currently_syncing.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_sync(self: &Arc<Self>, now: u64) -> Result<SyncResult, SyncError> {
        if self.quota.check(now).await.map_err(SyncError::Storage)?
            >= self.config.critical_threshold
        {
            tracing::warn!("quota critical during sync, proceeding best-effort after prune");
        }

        let drain = self.queue.process_queue(now).await?;
        self.schedule_retries(drain.retry_after.clone());

        let result: SyncResult = drain.into();

        self.store
            .set_metadata(METADATA_LAST_SYNC_TIME, Json::from(now))
            .await
            .map_err(SyncError::Storage)?;
        let conflicts = self.store.get_unresolved_conflicts().await.map_err(SyncError::Storage)?;
        let pending = self.queue.pending_count().await.map_err(SyncError::Storage)?;

        let status = if !conflicts.is_empty() {
            SyncStatus::Conflict
        } else if result.failed == 0 {
            SyncStatus::Synced
        } else {
            SyncStatus::Error
        };

        self.update_state(|s| {
            s.status = status;
            s.pending_changes = pending;
            s.last_synced_at = Some(now);
            s.conflicts = conflicts;
            s.error = if status == SyncStatus::Error { Some("one or more operations failed".to_string()) } else { None };
        });

        Ok(result)
    }

    pub async fn force_sync(self: &Arc<Self>) -> Result<SyncResult, SyncError> {
        let now = self.clock.now_millis();
        self.sync(now, true).await
    }

    /// Resolves a conflict by id, computing merged data via the conflict
    /// engine when the strategy is `merge` and none was supplied, then
    /// triggers a fresh sync.
    pub async fn resolve_conflict(
        self: &Arc<Self>,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_data: Option<Json>,
    ) -> Result<(), SyncError> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await
            .map_err(SyncError::Storage)?
            .ok_or(SyncError::UnresolvedConflict { id: conflict_id })?;

        let data = match merged_data {
            Some(d) => d,
            None => offline_core::resolve(
                strategy,
                conflict.local_data.as_ref(),
                conflict.server_data.as_ref(),
                conflict.base_data.as_ref(),
                conflict.kind,
                conflict.entity_type,
            )?,
        };

        let now = self.clock.now_millis();
        self.queue.resolve_conflict(conflict_id, strategy, data, now).await?;

        let conflicts = self.store.get_unresolved_conflicts().await.map_err(SyncError::Storage)?;
        self.update_state(|s| s.conflicts = conflicts);

        self.force_sync().await?;
        Ok(())
    }

    /// Drives only operations for one entity through the executor, bypassing
    /// the global drain.
    pub async fn sync_entity(self: &Arc<Self>, entity_type: EntityType, entity_id: &str) -> Result<SyncResult, SyncError> {
        let now = self.clock.now_millis();
        let drain = self.queue.process_filtered(entity_type, entity_id, now).await?;
        Ok(drain.into())
    }

    pub async fn retry_failed(&self) -> Result<u32, SyncError> {
        let now = self.clock.now_millis();
        self.queue.retry_failed(now).await.map_err(SyncError::Storage)
    }

    pub async fn clear_sync_queue(&self) -> Result<(), SyncError> {
        self.queue.clear().await.map_err(SyncError::Storage)?;
        self.update_state(|s| s.pending_changes = 0);
        Ok(())
    }

    /// Entry point for the runtime's background-sync event, per spec §6.3.
    pub async fn handle_background_sync(self: &Arc<Self>) -> Result<SyncResult, SyncError> {
        self.force_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkSensor;
    use crate::queue::{ExecutorOutcome, ScriptedExecutor};
    use crate::storage::InMemoryDurableStore;
    use offline_core::OperationType;
    use serde_json::json;

    fn engine_with(executor: Arc<dyn RemoteExecutor>, online: bool) -> Arc<SyncEngine> {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let sensor = Arc::new(NetworkSensor::new(online, 1_000));
        let config = OfflineConfig::default();
        let quota = Arc::new(QuotaGovernor::new(store.clone(), 100_000_000, &config));
        SyncEngine::new(store, executor, sensor, quota, config)
    }

    #[tokio::test]
    async fn sync_before_init_is_programmer_error() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let engine = engine_with(executor, true);
        let err = engine.sync(0, true).await.unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized));
    }

    #[tokio::test]
    async fn offline_sync_never_throws_and_is_zero_op() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let engine = engine_with(executor, false);
        engine.init().await.unwrap();
        let result = engine.sync(0, true).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.synced, 0);
    }

    #[tokio::test]
    async fn force_sync_bypasses_throttle() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let engine = engine_with(executor, true);
        engine.init().await.unwrap();

        engine
            .queue()
            .enqueue_session_update("L", json!({"v": 1}), 0, 0)
            .await
            .unwrap();
        let first = engine.sync(1_000, false).await.unwrap();
        assert_eq!(first.synced, 1);

        engine
            .queue()
            .enqueue_session_update("L", json!({"v": 2}), 1_001, 0)
            .await
            .unwrap();
        let throttled = engine.sync(1_001, false).await.unwrap();
        assert_eq!(throttled.synced, 0);

        let forced = engine.sync(1_001, true).await.unwrap();
        assert_eq!(forced.synced, 1);
    }

    #[tokio::test]
    async fn resolve_conflict_then_sync_clears_conflict_state() {
        let server_data = json!({"v": 99});
        let executor = Arc::new(ScriptedExecutor::new(vec![
            ExecutorOutcome::Conflict { server_data: server_data.clone() },
            ExecutorOutcome::Success { version: 3 },
        ]));
        let engine = engine_with(executor.clone() as Arc<dyn RemoteExecutor>, true);
        engine.init().await.unwrap();

        let op = offline_core::Operation::new(
            OperationType::UpdateSession,
            EntityType::Session,
            "L",
            json!({"v": 1}),
            0,
            0,
            5,
        );
        engine.queue().enqueue(op).await.unwrap();
        let result = engine.sync(0, true).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);

        let conflict_id = result.conflicts[0];
        engine
            .resolve_conflict(conflict_id, ResolutionStrategy::ServerWins, None)
            .await
            .unwrap();

        let state = engine.subscribe().borrow().clone();
        assert!(state.conflicts.is_empty());
    }
}
