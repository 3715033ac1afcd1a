//! Sync engine configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// First block to sync when no checkpoint exists.
    pub start_block: u64,
    /// Blocks per historical `eth_getLogs` window.
    pub batch_window: u64,
    /// Timestamp lookups issued concurrently per chunk.
    pub timestamp_chunk_size: usize,
    /// Pause between timestamp chunks.
    pub timestamp_pacing: Duration,
    /// Backoff for transient range/batch failures.
    pub retry: RetryConfig,
    /// How many times a dead live subscription is re-established (after a
    /// fresh catch-up) before the orchestrator gives up.
    pub max_resubscribes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            batch_window: 10,
            timestamp_chunk_size: 10,
            timestamp_pacing: Duration::from_millis(100),
            retry: RetryConfig::default(),
            max_resubscribes: 0,
        }
    }
}
