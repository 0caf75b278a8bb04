//! Engine-wide configuration, enumerated per the wire contract and defaults
//! the rest of the crate is built against.

use serde::{Deserialize, Serialize};

/// Tunables for the offline-sync engine.
///
/// Every field has the default the engine ships with; construct with
/// `OfflineConfig { syncIntervalMs: ..., ..Default::default() }`-style
/// partial overrides in application code. Derives `Serialize`/`Deserialize`
/// so a host can persist the active configuration alongside its durable
/// store and restore it verbatim on the next launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Durable namespace identifier.
    pub db_name: String,
    /// Schema version; bumping runs the store's migration routine.
    pub db_version: u32,
    /// Per-operation retry cap before a queue entry becomes `failed`.
    pub max_retries: u32,
    /// Backoff base delay.
    pub retry_base_delay_ms: u64,
    /// Backoff cap.
    pub retry_max_delay_ms: u64,
    /// Debounce window for `Facade::save_session`.
    pub sync_debounce_ms: u64,
    /// Automatic resolution strategy used when a conflict has no caller-chosen strategy.
    pub conflict_strategy: offline_core::ResolutionStrategy,
    /// Queue overflow trigger.
    pub max_queue_size: usize,
    /// Periodic drain interval while online.
    pub sync_interval_ms: u64,
    /// Minimum gap between successive drain attempts.
    pub min_sync_interval_ms: u64,
    /// Whether reconnecting triggers an immediate sync.
    pub auto_sync_on_reconnect: bool,
    /// Whether to register for runtime background-sync events.
    pub use_background_sync: bool,
    /// Storage usage percent (0-100) at which `onQuotaWarning` fires.
    pub warning_threshold: u8,
    /// Storage usage percent (0-100) at which `onQuotaCritical` fires and pruning runs.
    pub critical_threshold: u8,
    /// Post-prune watermark, percent of quota.
    pub prune_target: u8,
    /// Minimum headroom the governor tries to keep free.
    pub min_free_space_bytes: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            db_name: "goat-offline-db".to_string(),
            db_version: 1,
            max_retries: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            sync_debounce_ms: 500,
            conflict_strategy: offline_core::ResolutionStrategy::ServerWins,
            max_queue_size: 100,
            sync_interval_ms: 30_000,
            min_sync_interval_ms: 5_000,
            auto_sync_on_reconnect: true,
            use_background_sync: true,
            warning_threshold: 80,
            critical_threshold: 95,
            prune_target: 70,
            min_free_space_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Tag the engine registers with the runtime's background-sync facility.
pub const BACKGROUND_SYNC_TAG: &str = "goat-background-sync";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_enumerated_table() {
        let cfg = OfflineConfig::default();
        assert_eq!(cfg.db_name, "goat-offline-db");
        assert_eq!(cfg.db_version, 1);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.retry_base_delay_ms, 1_000);
        assert_eq!(cfg.retry_max_delay_ms, 30_000);
        assert_eq!(cfg.sync_debounce_ms, 500);
        assert_eq!(cfg.max_queue_size, 100);
        assert_eq!(cfg.sync_interval_ms, 30_000);
        assert_eq!(cfg.min_sync_interval_ms, 5_000);
        assert!(cfg.auto_sync_on_reconnect);
        assert!(cfg.use_background_sync);
        assert_eq!(cfg.warning_threshold, 80);
        assert_eq!(cfg.critical_threshold, 95);
        assert_eq!(cfg.prune_target, 70);
        assert_eq!(cfg.min_free_space_bytes, 50 * 1024 * 1024);
    }
}
