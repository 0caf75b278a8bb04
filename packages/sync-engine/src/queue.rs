//! Ordered, prioritized, retrying operation log, per spec §4.4.
//!
//! [`OperationQueue`] owns the drain discipline; actual network execution is
//! delegated to a [`RemoteExecutor`], mirroring the teacher's separation
//! between routing/pipeline logic and the handler that actually does I/O.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offline_core::{
    ConflictRecord, ConflictSnapshot, EntityType, Operation, OperationStatus, OperationType,
    ResolutionStrategy,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::config::OfflineConfig;
use crate::error::{RpcError, StorageError, SyncError};
use crate::storage::SharedStore;

/// The result of pushing one [`Operation`] through the remote authority.
#[derive(Debug, Clone)]
pub enum ExecutorOutcome {
    Success { version: u64 },
    Conflict { server_data: Json },
    Transient { message: Option<String> },
}

/// Pushes one operation to the remote authority and classifies its response.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, op: &Operation) -> ExecutorOutcome;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    operation: OperationType,
    #[serde(rename = "entityId")]
    entity_id: &'a str,
    #[serde(rename = "entityType")]
    entity_type: EntityType,
    payload: &'a Json,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct SuccessBody {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(rename = "serverData")]
    server_data: Json,
}

/// Default executor: the JSON RPC contract of spec §6.1 over HTTP.
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpExecutor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, op: &Operation) -> ExecutorOutcome {
        let body = RpcRequest {
            operation: op.op_type,
            entity_id: &op.entity_id,
            entity_type: op.entity_type,
            payload: &op.payload,
            timestamp: op.timestamp,
        };

        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return ExecutorOutcome::Transient { message: Some(RpcError::from(err).to_string()) },
            Err(_elapsed) => {
                return ExecutorOutcome::Transient {
                    message: Some(RpcError::Timeout { timeout_ms: self.timeout.as_millis() as u64 }.to_string()),
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.json::<SuccessBody>().await {
                Ok(body) => ExecutorOutcome::Success { version: body.version },
                Err(err) => ExecutorOutcome::Transient { message: Some(err.to_string()) },
            }
        } else if status.as_u16() == 409 {
            match response.json::<ConflictBody>().await {
                Ok(body) => ExecutorOutcome::Conflict { server_data: body.server_data },
                Err(err) => ExecutorOutcome::Transient { message: Some(err.to_string()) },
            }
        } else {
            let message = response.text().await.ok();
            ExecutorOutcome::Transient { message }
        }
    }
}

/// Scripted executor for deterministic tests: replays a fixed sequence of
/// outcomes, repeating the last one once exhausted.
pub struct ScriptedExecutor {
    script: AsyncMutex<Vec<ExecutorOutcome>>,
    calls: std::sync::atomic::AtomicU32,
}

impl ScriptedExecutor {
    #[must_use]
    pub fn new(script: Vec<ExecutorOutcome>) -> Self {
        Self {
            script: AsyncMutex::new(script),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, _op: &Operation) -> ExecutorOutcome {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut script = self.script.lock().await;
        if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().cloned().unwrap_or(ExecutorOutcome::Transient { message: None })
        }
    }
}

/// Events emitted once per queue-state transition, per spec §4.4/§5.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    SyncStart,
    SyncComplete { successful: u32, failed: u32 },
    SyncError { message: String },
    OperationSuccess { id: Uuid },
    OperationFailed { id: Uuid },
    ConflictDetected { id: Uuid },
    QueueChanged,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default)]
pub struct DrainResult {
    pub successful: u32,
    pub failed: u32,
    pub conflicts: Vec<Uuid>,
    pub duration_ms: u64,
    /// Operations that failed transiently this pass, with the backoff delay
    /// before they should be retried. The caller (the orchestrator) owns
    /// scheduling the actual timers, per spec §9's "timer hygiene" note.
    pub retry_after: Vec<(Uuid, Duration)>,
}

/// `delay = min(base * 2^retryCount, max) + jitter`, `jitter ∈ [0, 0.1·delay)`.
#[must_use]
pub fn backoff_delay(retry_count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << retry_count.min(32));
    let capped = exp.min(max_ms);
    let jitter_span = (capped as f64 * 0.1) as u64;
    let jitter = if jitter_span == 0 { 0 } else { rand::rng().random_range(0..jitter_span) };
    Duration::from_millis(capped + jitter)
}

/// Ordered, coalescing, retrying operation log.
pub struct OperationQueue {
    store: SharedStore,
    executor: Arc<dyn RemoteExecutor>,
    config: OfflineConfig,
    drain_lock: AsyncMutex<()>,
    last_drain_result: Mutex<DrainResult>,
    events: broadcast::Sender<QueueEvent>,
}

impl OperationQueue {
    #[must_use]
    pub fn new(store: SharedStore, executor: Arc<dyn RemoteExecutor>, config: OfflineConfig) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            store,
            executor,
            config,
            drain_lock: AsyncMutex::new(()),
            last_drain_result: Mutex::new(DrainResult::default()),
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    async fn enforce_overflow(&self) -> Result<(), StorageError> {
        let count = self.store.count_operations().await?;
        if count < self.config.max_queue_size {
            return Ok(());
        }
        let mut completed: Vec<_> = self
            .store
            .get_all_operations()
            .await?
            .into_iter()
            .filter(|o| o.status == OperationStatus::Completed)
            .collect();
        completed.sort_by_key(|o| o.timestamp);
        let drop_count = (completed.len() as f64 * 0.2).ceil() as usize;
        for op in completed.into_iter().take(drop_count) {
            self.store.remove_operation(op.id).await?;
        }
        // Per spec §4.4: if still full after pruning, the enqueue proceeds
        // anyway -- the caller's intent is never dropped.
        Ok(())
    }

    /// Enqueues a session update, coalescing with any existing pending
    /// `UPDATE_SESSION` for the same id.
    pub async fn enqueue_session_update(
        &self,
        entity_id: &str,
        payload: Json,
        timestamp: u64,
        priority: i32,
    ) -> Result<(), StorageError> {
        if let Some(mut existing) = self
            .store
            .find_pending_coalesce_target(EntityType::Session, entity_id, OperationType::UpdateSession)
            .await?
        {
            existing.payload = payload;
            existing.timestamp = timestamp;
            self.store.update_operation(existing).await?;
            self.emit(QueueEvent::QueueChanged);
            return Ok(());
        }

        self.enforce_overflow().await?;
        let op = Operation::new(
            OperationType::UpdateSession,
            EntityType::Session,
            entity_id,
            payload,
            timestamp,
            priority,
            self.config.max_retries,
        );
        self.store.enqueue(op).await?;
        self.emit(QueueEvent::QueueChanged);
        Ok(())
    }

    /// Enqueues any non-coalescing operation (grid updates, deletes, creates).
    pub async fn enqueue(&self, mut op: Operation) -> Result<(), StorageError> {
        if op.coalesces() {
            if let Some(mut existing) = self
                .store
                .find_pending_coalesce_target(op.entity_type, &op.entity_id, op.op_type)
                .await?
            {
                existing.payload = op.payload;
                existing.timestamp = op.timestamp;
                self.store.update_operation(existing).await?;
                self.emit(QueueEvent::QueueChanged);
                return Ok(());
            }
        }
        self.enforce_overflow().await?;
        op.max_retries = self.config.max_retries;
        self.store.enqueue(op).await?;
        self.emit(QueueEvent::QueueChanged);
        Ok(())
    }

    async fn snapshot_for(&self, entity_type: EntityType, entity_id: &str, op_timestamp: u64, now: u64) -> ConflictSnapshot {
        if entity_type == EntityType::Session {
            if let Ok(Some(session)) = self.store.get_session(entity_id).await {
                return ConflictSnapshot {
                    local_version: session.local_version,
                    server_version: session.server_version,
                    local_timestamp: op_timestamp,
                    server_timestamp: now,
                };
            }
        }
        ConflictSnapshot { local_version: 0, server_version: 0, local_timestamp: op_timestamp, server_timestamp: now }
    }

    async fn apply_success(&self, op: &Operation, version: u64, now: u64) -> Result<(), StorageError> {
        match op.op_type {
            OperationType::CreateSession | OperationType::UpdateSession => {
                self.store.mark_session_synced(&op.entity_id, version, now).await?;
            }
            OperationType::DeleteSession => {
                self.store.delete_session(&op.entity_id, now).await?;
            }
            OperationType::UpdateGrid | OperationType::UpdateBacklog => {}
        }
        Ok(())
    }

    /// Runs one drain pass: applies every pending operation in
    /// `(priority desc, timestamp asc)` order, strictly serially.
    ///
    /// Re-entrant-safe: a concurrent call while a drain is already running
    /// does not start a second parallel drain. Instead it waits for the
    /// in-flight drain to release `drain_lock` and shares that drain's actual
    /// result, since callers such as the orchestrator's retry scheduler act
    /// on `retry_after`/`conflicts` and must not see a fabricated empty pass.
    pub async fn process_queue(&self, now: u64) -> Result<DrainResult, SyncError> {
        let guard = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // The winner's guard is dropped only after it records its
                // result below, so observing the lock free here guarantees
                // `last_drain_result` already holds that drain's outcome.
                let _ = self.drain_lock.lock().await;
                return Ok(self.last_drain_result.lock().clone());
            }
        };

        self.emit(QueueEvent::SyncStart);
        let pending = self.store.get_pending().await.map_err(SyncError::Storage)?;
        let result = self.run_ops(pending, now).await?;
        *self.last_drain_result.lock() = result.clone();
        drop(guard);
        Ok(result)
    }

    /// Drives only operations matching `(entity_type, entity_id)` through
    /// the executor, bypassing the global single-drain guard entirely, per
    /// spec §4.6's selective sync.
    pub async fn process_filtered(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        now: u64,
    ) -> Result<DrainResult, SyncError> {
        let pending: Vec<Operation> = self
            .store
            .get_pending()
            .await
            .map_err(SyncError::Storage)?
            .into_iter()
            .filter(|o| o.entity_type == entity_type && o.entity_id == entity_id)
            .collect();
        self.run_ops(pending, now).await
    }

    async fn run_ops(&self, pending: Vec<Operation>, now: u64) -> Result<DrainResult, SyncError> {
        let started = now;
        let mut result = DrainResult::default();

        for mut op in pending {
            op.status = OperationStatus::InProgress;
            self.store.update_operation(op.clone()).await.map_err(SyncError::Storage)?;

            match self.executor.execute(&op).await {
                ExecutorOutcome::Success { version } => {
                    op.status = OperationStatus::Completed;
                    op.last_error = None;
                    self.store.update_operation(op.clone()).await.map_err(SyncError::Storage)?;
                    self.apply_success(&op, version, now).await.map_err(SyncError::Storage)?;
                    result.successful += 1;
                    self.emit(QueueEvent::OperationSuccess { id: op.id });
                }
                ExecutorOutcome::Conflict { server_data } => {
                    let local_data = match op.op_type {
                        OperationType::DeleteSession => None,
                        _ => Some(op.payload.clone()),
                    };
                    let kind = offline_core::classify(local_data.as_ref(), Some(&server_data));
                    let snapshot = self.snapshot_for(op.entity_type, &op.entity_id, op.timestamp, now).await;

                    let conflict = ConflictRecord {
                        id: Uuid::new_v4(),
                        operation_id: op.id,
                        entity_type: op.entity_type,
                        entity_id: op.entity_id.clone(),
                        kind,
                        local_data,
                        server_data: Some(server_data),
                        base_data: None,
                        created_at: now,
                        resolved_at: None,
                        resolution: None,
                        resolved_data: None,
                    };
                    self.store.add_conflict(conflict.clone()).await.map_err(SyncError::Storage)?;

                    op.status = OperationStatus::Conflict;
                    op.conflict_snapshot = Some(snapshot);
                    self.store.update_operation(op).await.map_err(SyncError::Storage)?;

                    result.conflicts.push(conflict.id);
                    self.emit(QueueEvent::ConflictDetected { id: conflict.id });
                }
                ExecutorOutcome::Transient { message } => {
                    op.retry_count += 1;
                    op.last_error = message;
                    if op.retry_count > op.max_retries {
                        op.status = OperationStatus::Failed;
                        result.failed += 1;
                        self.store.update_operation(op.clone()).await.map_err(SyncError::Storage)?;
                        self.emit(QueueEvent::OperationFailed { id: op.id });
                    } else {
                        op.status = OperationStatus::Pending;
                        let delay = backoff_delay(op.retry_count, self.config.retry_base_delay_ms, self.config.retry_max_delay_ms);
                        result.retry_after.push((op.id, delay));
                        self.store.update_operation(op).await.map_err(SyncError::Storage)?;
                    }
                }
            }
        }

        result.duration_ms = now.saturating_sub(started);
        self.emit(QueueEvent::SyncComplete { successful: result.successful, failed: result.failed });
        Ok(result)
    }

    /// Rewrites a conflicted operation's payload per the chosen strategy and
    /// requeues it for the next drain.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_data: Json,
        now: u64,
    ) -> Result<(), SyncError> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await
            .map_err(SyncError::Storage)?
            .ok_or(SyncError::UnresolvedConflict { id: conflict_id })?;

        let mut op = self
            .store
            .get_all_operations()
            .await
            .map_err(SyncError::Storage)?
            .into_iter()
            .find(|o| o.id == conflict.operation_id)
            .ok_or(SyncError::UnresolvedConflict { id: conflict_id })?;

        op.payload = merged_data.clone();
        op.conflict_snapshot = None;
        op.retry_count = 0;
        op.status = OperationStatus::Pending;
        self.store.update_operation(op).await.map_err(SyncError::Storage)?;

        self.store
            .resolve_conflict(conflict_id, strategy, merged_data, now)
            .await
            .map_err(SyncError::Storage)?;
        self.emit(QueueEvent::QueueChanged);
        Ok(())
    }

    pub async fn retry_failed(&self, now: u64) -> Result<u32, StorageError> {
        let mut count = 0;
        for mut op in self.store.get_all_operations().await? {
            if op.status == OperationStatus::Failed {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                op.last_error = None;
                self.store.update_operation(op).await?;
                count += 1;
            }
        }
        let _ = now;
        self.emit(QueueEvent::QueueChanged);
        Ok(count)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let ops = self.store.get_all_operations().await?;
        for op in ops {
            self.store.remove_operation(op.id).await?;
        }
        self.emit(QueueEvent::QueueChanged);
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<usize, StorageError> {
        Ok(self.store.get_pending().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDurableStore;
    use serde_json::json;

    fn queue_with(store: SharedStore, executor: Arc<dyn RemoteExecutor>) -> OperationQueue {
        OperationQueue::new(store, executor, OfflineConfig::default())
    }

    #[test]
    fn p4_backoff_grows_exponentially_with_jitter_bound() {
        for k in 0..5 {
            let d = backoff_delay(k, 1_000, 30_000).as_millis() as u64;
            let base = 1_000u64 * (1u64 << k);
            assert!(d >= base, "delay {d} below base {base}");
            assert!(d as f64 <= 1.1 * base as f64 + 1.0, "delay {d} above 1.1x base {base}");
        }
    }

    #[test]
    fn backoff_caps_at_max() {
        let d = backoff_delay(10, 1_000, 30_000).as_millis() as u64;
        assert!(d <= (30_000.0 * 1.1) as u64);
    }

    #[tokio::test]
    async fn scenario1_offline_save_then_drain_success() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        store.save_session("L", json!({"v": 1}), 0).await.unwrap();
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 7 }]));
        let queue = queue_with(store.clone(), executor.clone());
        queue.enqueue_session_update("L", json!({"v": 1}), 0, 0).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let result = queue.process_queue(10).await.unwrap();
        assert_eq!(result.successful, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        let session = store.get_session("L").await.unwrap().unwrap();
        assert!(!session.is_dirty);
        assert_eq!(session.server_version, 7);
    }

    #[tokio::test]
    async fn scenario2_burst_coalesces_to_one_op_latest_payload() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let queue = queue_with(store.clone(), executor);

        for v in 1..=5 {
            queue.enqueue_session_update("L", json!({"v": v}), v as u64, 0).await.unwrap();
        }

        assert_eq!(store.count_operations().await.unwrap(), 1);
        let ops = store.get_all_operations().await.unwrap();
        assert_eq!(ops[0].payload, json!({"v": 5}));
    }

    #[tokio::test]
    async fn scenario3_retry_sequence_then_success() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let executor = Arc::new(ScriptedExecutor::new(vec![
            ExecutorOutcome::Transient { message: Some("500".into()) },
            ExecutorOutcome::Transient { message: Some("500".into()) },
            ExecutorOutcome::Transient { message: Some("500".into()) },
            ExecutorOutcome::Success { version: 1 },
        ]));
        let queue = queue_with(store.clone(), executor.clone() as Arc<dyn RemoteExecutor>);
        queue.enqueue_session_update("L", json!({"v": 1}), 0, 0).await.unwrap();

        let r1 = queue.process_queue(0).await.unwrap();
        assert_eq!(r1.retry_after.len(), 1);
        let r2 = queue.process_queue(1_000).await.unwrap();
        assert_eq!(r2.retry_after.len(), 1);
        let r3 = queue.process_queue(3_000).await.unwrap();
        assert_eq!(r3.retry_after.len(), 1);
        let r4 = queue.process_queue(7_000).await.unwrap();
        assert_eq!(r4.successful, 1);

        assert_eq!(executor.call_count(), 4);
    }

    #[tokio::test]
    async fn scenario4_conflict_then_resolve_merge_and_local_wins() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let server_grid = json!([{"matched": true, "backlogItemId": "c"}]);
        let executor = Arc::new(ScriptedExecutor::new(vec![
            ExecutorOutcome::Conflict { server_data: server_grid.clone() },
        ]));
        let queue = queue_with(store.clone(), executor.clone() as Arc<dyn RemoteExecutor>);

        let op = Operation::new(
            OperationType::UpdateGrid,
            EntityType::Grid,
            "L",
            json!([{"matched": true, "backlogItemId": "b"}]),
            0,
            0,
            5,
        );
        queue.enqueue(op).await.unwrap();

        let result = queue.process_queue(0).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);

        let conflict_id = result.conflicts[0];
        let conflict = store.get_conflict(conflict_id).await.unwrap().unwrap();
        assert_eq!(conflict.kind, offline_core::ConflictKind::UpdateUpdate);

        queue
            .resolve_conflict(conflict_id, ResolutionStrategy::LocalWins, json!([{"matched": true, "backlogItemId": "b"}]), 1)
            .await
            .unwrap();

        let resolved = store.get_conflict(conflict_id).await.unwrap().unwrap();
        assert!(resolved.is_resolved());
    }

    #[tokio::test]
    async fn scenario6_delete_vs_update_conflict_classification() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        store.save_session("L", json!({"v": 1}), 0).await.unwrap();
        let server_data = json!({"v": 2});
        let executor = Arc::new(ScriptedExecutor::new(vec![
            ExecutorOutcome::Conflict { server_data: server_data.clone() },
        ]));
        let queue = queue_with(store.clone(), executor as Arc<dyn RemoteExecutor>);

        let delete_op = Operation::new(OperationType::DeleteSession, EntityType::Session, "L", json!(null), 0, 0, 5);
        queue.enqueue(delete_op).await.unwrap();

        let result = queue.process_queue(0).await.unwrap();
        let conflict = store.get_conflict(result.conflicts[0]).await.unwrap().unwrap();
        assert_eq!(conflict.kind, offline_core::ConflictKind::DeleteUpdate);
        assert_eq!(
            offline_core::recommended_strategy(conflict.kind, EntityType::Session),
            ResolutionStrategy::ServerWins
        );
    }

    #[tokio::test]
    async fn p8_clear_empties_pending() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let queue = queue_with(store.clone(), executor);
        queue.enqueue_session_update("L", json!({}), 0, 0).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn overflow_enqueue_still_succeeds_after_pruning_completed() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::new(vec![ExecutorOutcome::Success { version: 1 }]));
        let mut config = OfflineConfig::default();
        config.max_queue_size = 2;
        let queue = OperationQueue::new(store.clone(), executor, config);

        let mut completed = Operation::new(OperationType::UpdateGrid, EntityType::Grid, "a", json!({}), 0, 0, 5);
        completed.status = OperationStatus::Completed;
        store.enqueue(completed).await.unwrap();
        let pending = Operation::new(OperationType::UpdateGrid, EntityType::Grid, "b", json!({}), 1, 0, 5);
        store.enqueue(pending).await.unwrap();

        let fresh = Operation::new(OperationType::UpdateGrid, EntityType::Grid, "c", json!({}), 2, 0, 5);
        queue.enqueue(fresh).await.unwrap();

        assert!(store.count_operations().await.unwrap() <= 3);
    }
}
