//! Offline-first session synchronization: durable local storage, connectivity
//! sensing, quota governance, a retrying operation queue, and the orchestrator
//! that ties them together behind one reactive facade.

pub mod config;
pub mod error;
pub mod facade;
pub mod network;
pub mod queue;
pub mod quota;
pub mod storage;
pub mod sync_engine;

pub use config::{OfflineConfig, BACKGROUND_SYNC_TAG};
pub use error::{RpcError, StorageError, SyncError};
pub use facade::{Facade, Snapshot};
pub use network::{ConnectivitySource, LinkQuality, NetworkSensor, NetworkState};
pub use queue::{
    backoff_delay, DrainResult, ExecutorOutcome, HttpExecutor, OperationQueue, QueueEvent,
    RemoteExecutor, ScriptedExecutor,
};
pub use quota::{PruneStrategy, QuotaEvent, QuotaGovernor};
pub use storage::{DurableStore, InMemoryDurableStore, SharedStore, StorageEvent};
pub use sync_engine::{
    BackgroundSyncPort, NoopBackgroundSyncPort, SyncEngine, SyncResult, SyncState, SyncStatus,
};

#[cfg(test)]
mod tests {
    #[test]
    fn re_exports_accessible_from_crate_root() {
        let _config = crate::OfflineConfig::default();
        let _status = crate::SyncStatus::Idle;
    }
}
