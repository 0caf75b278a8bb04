//! Storage-usage governance: threshold detection and ordered pruning to a
//! target watermark, per spec §4.3.

use async_trait::async_trait;
use offline_core::OperationStatus;
use tokio::sync::broadcast;

use crate::error::StorageError;
use crate::storage::SharedStore;

/// Fired when usage crosses a configured threshold.
#[derive(Debug, Clone, Copy)]
pub enum QuotaEvent {
    Warning { usage_percent: u8 },
    Critical { usage_percent: u8 },
}

/// One step of the prune pipeline. Strategies run in ascending registration
/// order until the deficit is cleared or the pipeline is exhausted.
#[async_trait]
pub trait PruneStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, store: &SharedStore, now: u64) -> Result<(), StorageError>;
}

pub struct DropExpiredBacklog;

#[async_trait]
impl PruneStrategy for DropExpiredBacklog {
    fn name(&self) -> &'static str {
        "drop_expired_backlog"
    }

    async fn run(&self, store: &SharedStore, now: u64) -> Result<(), StorageError> {
        store.prune_expired_backlog(now).await?;
        Ok(())
    }
}

pub struct DropCompletedOperations;

#[async_trait]
impl PruneStrategy for DropCompletedOperations {
    fn name(&self) -> &'static str {
        "drop_completed_operations"
    }

    async fn run(&self, store: &SharedStore, _now: u64) -> Result<(), StorageError> {
        let ops = store.get_all_operations().await?;
        for op in ops.into_iter().filter(|o| o.status == OperationStatus::Completed) {
            store.remove_operation(op.id).await?;
        }
        Ok(())
    }
}

/// Age past which a resolved conflict is considered safe to drop.
const STALE_CONFLICT_AGE_MS: u64 = 24 * 60 * 60 * 1000;

pub struct DropOldResolvedConflicts;

#[async_trait]
impl PruneStrategy for DropOldResolvedConflicts {
    fn name(&self) -> &'static str {
        "drop_old_resolved_conflicts"
    }

    async fn run(&self, store: &SharedStore, now: u64) -> Result<(), StorageError> {
        let stale: Vec<_> = store
            .get_resolved_conflicts()
            .await?
            .into_iter()
            .filter(|c| now.saturating_sub(c.resolved_at.unwrap_or(now)) >= STALE_CONFLICT_AGE_MS)
            .collect();
        for conflict in stale {
            store.remove_conflict(conflict.id).await?;
        }
        Ok(())
    }
}

const STALE_SESSION_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

pub struct DeleteStaleSessions;

#[async_trait]
impl PruneStrategy for DeleteStaleSessions {
    fn name(&self) -> &'static str {
        "delete_stale_sessions"
    }

    async fn run(&self, store: &SharedStore, now: u64) -> Result<(), StorageError> {
        let mut stale: Vec<_> = store
            .get_all_sessions()
            .await?
            .into_iter()
            .filter(|s| !s.is_dirty && now.saturating_sub(s.last_modified) >= STALE_SESSION_AGE_MS)
            .collect();
        stale.sort_by_key(|s| s.last_modified);
        let cohort_limit = (stale.len() as f64 * 0.2).ceil() as usize;
        for session in stale.into_iter().take(cohort_limit) {
            store.delete_session(&session.list_id, now).await?;
        }
        Ok(())
    }
}

/// Watches storage usage and runs the prune pipeline under pressure.
pub struct QuotaGovernor {
    store: SharedStore,
    quota_bytes: u64,
    warning_threshold: u8,
    critical_threshold: u8,
    prune_target: u8,
    min_free_space_bytes: u64,
    strategies: Vec<Box<dyn PruneStrategy>>,
    events: broadcast::Sender<QuotaEvent>,
}

impl QuotaGovernor {
    #[must_use]
    pub fn new(store: SharedStore, quota_bytes: u64, config: &crate::config::OfflineConfig) -> Self {
        let (events, _rx) = broadcast::channel(32);
        Self {
            store,
            quota_bytes,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            prune_target: config.prune_target,
            min_free_space_bytes: config.min_free_space_bytes,
            strategies: vec![
                Box::new(DropExpiredBacklog),
                Box::new(DropCompletedOperations),
                Box::new(DropOldResolvedConflicts),
                Box::new(DeleteStaleSessions),
            ],
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QuotaEvent> {
        self.events.subscribe()
    }

    async fn usage_percent(&self) -> Result<u8, StorageError> {
        let usage = self.store.estimated_usage_bytes().await?;
        Ok(((usage.saturating_mul(100)) / self.quota_bytes.max(1)).min(100) as u8)
    }

    /// Runs one periodic check: emits threshold events and prunes under critical pressure.
    pub async fn check(&self, now: u64) -> Result<u8, StorageError> {
        let pct = self.usage_percent().await?;
        if pct >= self.critical_threshold {
            let _ = self.events.send(QuotaEvent::Critical { usage_percent: pct });
            self.prune_to_target(now).await?;
        } else if pct >= self.warning_threshold {
            let _ = self.events.send(QuotaEvent::Warning { usage_percent: pct });
        }
        Ok(pct)
    }

    /// Returns whether `bytes` more can be written while keeping the configured headroom.
    pub async fn has_space(&self, bytes: u64) -> Result<bool, StorageError> {
        let usage = self.store.estimated_usage_bytes().await?;
        let available = self.quota_bytes.saturating_sub(usage);
        Ok(bytes.saturating_add(self.min_free_space_bytes) <= available)
    }

    /// Runs registered strategies in order until usage falls to `pruneTarget` or they're exhausted.
    pub async fn prune_to_target(&self, now: u64) -> Result<(), StorageError> {
        for strategy in &self.strategies {
            if self.usage_percent().await? <= self.prune_target {
                break;
            }
            tracing::debug!(strategy = strategy.name(), "running prune strategy");
            strategy.run(&self.store, now).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::storage::InMemoryDurableStore;
    use offline_core::{EntityType, Operation, OperationStatus, OperationType};
    use serde_json::json;
    use std::sync::Arc;

    fn governor(quota_bytes: u64) -> QuotaGovernor {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        QuotaGovernor::new(store, quota_bytes, &OfflineConfig::default())
    }

    #[tokio::test]
    async fn drop_old_resolved_conflicts_sweeps_only_stale_resolved_ones() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        let op = Operation::new(OperationType::UpdateGrid, EntityType::Grid, "L", json!({}), 0, 0, 5);
        store.enqueue(op.clone()).await.unwrap();

        let mut old_resolved = offline_core::ConflictRecord {
            id: uuid::Uuid::new_v4(),
            operation_id: op.id,
            entity_type: EntityType::Grid,
            entity_id: "L".to_string(),
            kind: offline_core::ConflictKind::UpdateUpdate,
            local_data: Some(json!({"v": 1})),
            server_data: Some(json!({"v": 2})),
            base_data: None,
            created_at: 0,
            resolved_at: Some(0),
            resolution: Some(offline_core::ResolutionStrategy::ServerWins),
            resolved_data: Some(json!({"v": 2})),
        };
        store.add_conflict(old_resolved.clone()).await.unwrap();

        old_resolved.id = uuid::Uuid::new_v4();
        old_resolved.resolved_at = Some(STALE_CONFLICT_AGE_MS);
        store.add_conflict(old_resolved.clone()).await.unwrap();

        let now = STALE_CONFLICT_AGE_MS + 1;
        DropOldResolvedConflicts.run(&store, now).await.unwrap();

        let remaining = store.get_resolved_conflicts().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].resolved_at, Some(STALE_CONFLICT_AGE_MS));
    }

    #[tokio::test]
    async fn has_space_respects_min_free_space() {
        let g = governor(1_000_000);
        assert!(!g.has_space(999_999).await.unwrap());
    }

    #[tokio::test]
    async fn scenario5_critical_prune_drops_completed_ops_not_dirty_sessions() {
        let store: SharedStore = Arc::new(InMemoryDurableStore::new());
        store.save_session("dirty", json!({"payload": "x".repeat(200)}), 0).await.unwrap();

        let mut completed_op = Operation::new(
            OperationType::UpdateSession,
            EntityType::Session,
            "done",
            json!({"payload": "y".repeat(5_000)}),
            0,
            0,
            5,
        );
        completed_op.status = OperationStatus::Completed;
        store.enqueue(completed_op).await.unwrap();

        let usage = store.estimated_usage_bytes().await.unwrap();
        let quota = (usage as f64 / 0.96) as u64;
        let governor = QuotaGovernor::new(store.clone(), quota, &OfflineConfig::default());

        let pct = governor.check(0).await.unwrap();
        assert!(pct >= 95);

        assert_eq!(store.count_operations().await.unwrap(), 0);
        let dirty = store.get_session("dirty").await.unwrap().unwrap();
        assert!(dirty.is_dirty);
    }
}
