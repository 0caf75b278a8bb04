//! Error types for the storage, network, and orchestration layers.
//!
//! Per spec §7, conflicts and offline sync attempts are never represented as
//! errors -- they are structured results. These enums cover the kinds that
//! genuinely need `Result` propagation: storage failures, RPC failures, and
//! programmer misuse of the public API.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session not found: {list_id}")]
    SessionNotFound { list_id: String },

    #[error("conflict not found: {id}")]
    ConflictNotFound { id: uuid::Uuid },

    #[error("durable backend unavailable, operating in degraded in-memory mode")]
    Degraded,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transient failure: {message}")]
    Transient { status: u16, message: String },

    #[error("conflict: server holds diverged data")]
    Conflict { server_data: serde_json::Value },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("no executor configured")]
    MissingExecutor,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Merge(#[from] offline_core::MergeError),

    #[error("conflict {id} has no registered resolution strategy")]
    UnresolvedConflict { id: uuid::Uuid },
}
