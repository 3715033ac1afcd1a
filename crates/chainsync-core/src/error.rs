//! Error taxonomy for the sync pipeline.

use thiserror::Error;

/// Errors that can occur while syncing, persisting or serving transfers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient RPC/network failure. Retrying the same range is safe.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The endpoint refused the block window; the caller must shrink it.
    #[error("block range {from}..={to} too large: {reason}")]
    RangeTooLarge { from: u64, to: u64, reason: String },

    /// Transaction failure. The batch was rolled back in full.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The live channel cannot be sustained; no further batches will arrive.
    #[error("subscription failed: {0}")]
    FatalSubscription(String),

    #[error("malformed transfer log {tx_hash}#{log_index}: {reason}")]
    Decode {
        tx_hash: String,
        log_index: u32,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync aborted: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    /// Returns `true` if retrying the same range or batch is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Persistence(_))
    }

    /// Returns `true` if the caller should retry with a smaller block window.
    pub fn is_range_too_large(&self) -> bool {
        matches!(self, Self::RangeTooLarge { .. })
    }

    /// Returns `true` if the live subscription is dead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalSubscription(_))
    }
}
