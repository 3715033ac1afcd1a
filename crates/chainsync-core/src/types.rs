//! Shared types for the sync pipeline.

use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A log as delivered by a [`ChainDataSource`](crate::source::ChainDataSource),
/// already parsed out of its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// Non-indexed, ABI-encoded payload.
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    /// Position of the log within its block.
    pub log_index: u32,
    /// `true` if the node reports this log as dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

// ─── TransferEvent ────────────────────────────────────────────────────────────

/// A decoded `Transfer` occurrence, normalized for storage.
///
/// `(tx_hash, log_index)` is the identity key. Hex values are lower-case and
/// `0x`-prefixed; `amount` is the decimal rendering of a `uint256`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub tx_hash: String,
    pub log_index: u32,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub block_number: u64,
    pub block_hash: String,
    /// Seconds since the Unix epoch.
    pub block_timestamp: u64,
}

/// A stored transfer row as served by the read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(flatten)]
    pub event: TransferEvent,
    /// When the row was first inserted.
    pub created_at: DateTime<Utc>,
}

// ─── SyncCheckpoint ───────────────────────────────────────────────────────────

/// Progress marker for one watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// Lower-case `0x` hex address; primary key.
    pub contract_address: String,
    /// Highest block whose matching logs are all persisted.
    pub last_synced_block: u64,
}

// ─── SyncPhase ────────────────────────────────────────────────────────────────

/// The orchestrator's state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Reading the checkpoint and chain head.
    Init,
    /// Replaying bounded historical ranges up to the head.
    CatchUp,
    /// Consuming the live subscription.
    Realtime,
    /// Terminated on an unrecoverable error.
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::CatchUp => write!(f, "catch-up"),
            Self::Realtime => write!(f, "realtime"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// The catch-up window starting at `pointer`: at most `window` blocks,
    /// never past `head`.
    pub fn window(pointer: u64, head: u64, window: u64) -> Self {
        let span = window.max(1) - 1;
        Self {
            from: pointer,
            to: pointer.saturating_add(span).min(head),
        }
    }

    /// Number of blocks covered.
    pub fn block_count(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    /// The first half of this range (at least one block).
    pub fn halved(&self) -> Self {
        let half = (self.block_count() / 2).max(1);
        Self {
            from: self.from,
            to: self.from + half - 1,
        }
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}-{}]", self.from, self.to)
    }
}

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Lower-case, `0x`-prefixed hex of arbitrary bytes.
pub fn lower_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 20-byte address (any case, with or without `0x`) and return its
/// lower-case `0x` form.
pub fn normalize_address(input: &str) -> Result<String, SyncError> {
    let addr = Address::from_str(input.trim())
        .map_err(|e| SyncError::Config(format!("invalid address {input:?}: {e}")))?;
    Ok(lower_hex(addr.as_slice()))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
