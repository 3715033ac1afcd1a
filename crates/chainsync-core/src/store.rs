//! Persistence traits — the write path used by the orchestrator and the
//! read path used by the query API.
//!
//! Implementations live in `chainsync-storage` (memory, SQLite, Postgres).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{SyncCheckpoint, TransferEvent, TransferRecord};

/// Outcome of a committed [`TransferStore::persist_batch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Rows that were not stored before.
    pub inserted: u64,
    /// Rows absorbed because `(tx_hash, log_index)` already existed.
    pub duplicates: u64,
    /// Checkpoint value stored for the contract after the commit.
    pub checkpoint: u64,
}

/// Transactional, idempotent persistence of transfers plus checkpoint.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert `events` and advance the checkpoint of `contract` to
    /// `checkpoint_block`, all in one transaction.
    ///
    /// A conflicting `(tx_hash, log_index)` is a successful no-op. The stored
    /// checkpoint never moves backwards. On any failure nothing is written
    /// and [`SyncError::Persistence`] is returned.
    async fn persist_batch(
        &self,
        events: &[TransferEvent],
        checkpoint_block: u64,
        contract: &str,
    ) -> Result<BatchAck, SyncError>;

    /// Last synced block for `contract`, or `None` if no run recorded
    /// progress yet.
    async fn read_checkpoint(&self, contract: &str) -> Result<Option<u64>, SyncError>;
}

/// Read-only queries over committed rows.
#[async_trait]
pub trait TransferQuery: Send + Sync {
    /// Transfers where `address` is sender or receiver, newest first
    /// (`block_number DESC, log_index DESC`).
    async fn transfers_for_address(
        &self,
        address: &str,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, SyncError>;

    /// Every checkpoint row.
    async fn sync_status(&self) -> Result<Vec<SyncCheckpoint>, SyncError>;
}

/// A backend that serves both the write and the read path.
pub trait SyncStorage: TransferStore + TransferQuery {}

impl<T: TransferStore + TransferQuery + ?Sized> SyncStorage for T {}

// ─── Pagination ───────────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A validated page request (`page >= 1`, `1 <= limit <= 100`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Clamp raw query values. Missing or zero values fall back to the
    /// defaults (page 1, limit 20).
    pub fn clamped(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = match page {
            None | Some(0) => 1,
            Some(p) => p.clamp(1, u32::MAX as i64) as u32,
        };
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) => l.clamp(1, MAX_PAGE_LIMIT as i64) as u32,
        };
        Self { page, limit }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Rows to skip.
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::clamped(None, None)
    }
}

/// Pagination metadata returned with every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(request: PageRequest, total_items: u64) -> Self {
        Self {
            page: request.page(),
            limit: request.limit(),
            total_items,
            total_pages: total_items.div_ceil(request.limit() as u64),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}
