//! Fluent builder API for sync orchestrators.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chainsync_evm::SyncBuilder;
//!
//! let config = SyncBuilder::new()
//!     .start_block(19_000_000)
//!     .batch_window(50)
//!     .timestamp_pacing(Duration::from_millis(250))
//!     .max_retries(5)
//!     .build_config();
//! ```

use std::sync::Arc;
use std::time::Duration;

use chainsync_core::{ChainDataSource, RetryConfig, SyncConfig, SyncError, TransferStore};

use crate::sync_loop::SyncOrchestrator;

/// Fluent builder for [`SyncConfig`] and [`SyncOrchestrator`].
#[derive(Default)]
pub struct SyncBuilder {
    config: SyncConfig,
}

impl SyncBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// First block to sync when the contract has no checkpoint yet.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Blocks per historical `eth_getLogs` window.
    pub fn batch_window(mut self, blocks: u64) -> Self {
        self.config.batch_window = blocks;
        self
    }

    pub fn timestamp_chunk_size(mut self, size: usize) -> Self {
        self.config.timestamp_chunk_size = size;
        self
    }

    pub fn timestamp_pacing(mut self, pacing: Duration) -> Self {
        self.config.timestamp_pacing = pacing;
        self
    }

    /// Replace the whole retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Retry budget per range or batch; `0` aborts on the first failure.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.config.retry.initial_backoff = delay;
        self
    }

    /// How often a dead subscription is re-established before giving up.
    pub fn max_resubscribes(mut self, n: u32) -> Self {
        self.config.max_resubscribes = n;
        self
    }

    pub fn build_config(self) -> SyncConfig {
        self.config
    }

    /// Build an orchestrator for `contract`.
    pub fn build<S, St>(
        self,
        source: Arc<S>,
        store: Arc<St>,
        contract: &str,
    ) -> Result<SyncOrchestrator<S, St>, SyncError>
    where
        S: ChainDataSource + ?Sized,
        St: TransferStore + ?Sized,
    {
        if self.config.batch_window == 0 {
            return Err(SyncError::Config("batch window must be at least 1 block".into()));
        }
        SyncOrchestrator::new(source, store, contract, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = SyncBuilder::new().build_config();
        assert_eq!(config.start_block, 0);
        assert_eq!(config.batch_window, 10);
        assert_eq!(config.timestamp_chunk_size, 10);
        assert_eq!(config.timestamp_pacing, Duration::from_millis(100));
        assert_eq!(config.max_resubscribes, 0);
    }

    #[test]
    fn builder_custom() {
        let config = SyncBuilder::new()
            .start_block(19_000_000)
            .batch_window(500)
            .max_retries(0)
            .initial_backoff(Duration::from_millis(5))
            .max_resubscribes(3)
            .build_config();
        assert_eq!(config.start_block, 19_000_000);
        assert_eq!(config.batch_window, 500);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(5));
        assert_eq!(config.max_resubscribes, 3);
    }
}
