//! chainsync-core — types, error taxonomy and the traits at the seams of the
//! single-contract transfer sync engine.
//!
//! # Architecture
//!
//! ```text
//! SyncOrchestrator (chainsync-evm)
//!     ├── ChainDataSource        (head, ranged logs, timestamps, live subscription)
//!     ├── BlockTimestampResolver (chunked, paced timestamp lookups)
//!     └── TransferStore          (idempotent inserts + checkpoint, one transaction)
//!
//! TransferQuery ── read API (chainsync-api)
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod retry;
pub mod source;
pub mod store;
pub mod types;

pub use config::SyncConfig;
pub use error::SyncError;
pub use event::{decode_transfer, transfer_topic, TRANSFER_EVENT_SIGNATURE};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{ChainDataSource, LogFilter, LogSubscription, SubscriptionSink};
pub use store::{
    BatchAck, Page, PageRequest, Pagination, SyncStorage, TransferQuery, TransferStore,
};
pub use types::{
    lower_hex, normalize_address, BlockRange, RawLog, SyncCheckpoint, SyncPhase, TransferEvent,
    TransferRecord,
};
