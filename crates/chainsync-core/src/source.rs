//! The chain data source boundary.
//!
//! A [`ChainDataSource`] answers head/log/timestamp queries and opens a live
//! [`LogSubscription`]. Live delivery is a bounded channel between the
//! adapter's producer task and a single consumer, so batches are processed
//! one at a time and in delivery order.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::event::transfer_topic;
use crate::types::RawLog;

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Which logs to query or subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contract.
    pub address: Address,
    /// Event signature hash (`topics[0]`).
    pub event_signature: B256,
}

impl LogFilter {
    /// Filter for ERC-20 `Transfer` logs of a single contract.
    pub fn transfers(address: Address) -> Self {
        Self {
            address,
            event_signature: transfer_topic(),
        }
    }
}

// ─── ChainDataSource ──────────────────────────────────────────────────────────

/// Abstraction over the blockchain RPC endpoint.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Latest block number known to the endpoint.
    async fn current_height(&self) -> Result<u64, SyncError>;

    /// All logs matching `filter` in the inclusive range `[from, to]`.
    ///
    /// Fails with [`SyncError::RangeTooLarge`] when the endpoint rejects the
    /// window size; shrinking the window is the caller's job.
    async fn get_logs(&self, filter: &LogFilter, from: u64, to: u64)
        -> Result<Vec<RawLog>, SyncError>;

    /// Timestamp (seconds since epoch) of `block_number`.
    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, SyncError>;

    /// Open a persistent push channel of newly observed logs.
    async fn subscribe(&self, filter: &LogFilter) -> Result<LogSubscription, SyncError>;
}

// ─── LogSubscription ──────────────────────────────────────────────────────────

type Delivery = Result<Vec<RawLog>, SyncError>;

/// Consumer side of a live log subscription.
///
/// Dropping it aborts the producer task (if one was attached).
pub struct LogSubscription {
    rx: mpsc::Receiver<Delivery>,
    task: Option<JoinHandle<()>>,
    dead: bool,
}

/// Producer side of a live log subscription.
pub struct SubscriptionSink {
    tx: mpsc::Sender<Delivery>,
}

impl LogSubscription {
    /// Create a connected sink/subscription pair with room for `capacity`
    /// undelivered batches.
    pub fn channel(capacity: usize) -> (SubscriptionSink, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            SubscriptionSink { tx },
            Self {
                rx,
                task: None,
                dead: false,
            },
        )
    }

    /// Tie the producer task's lifetime to this subscription.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Wait for the next non-empty batch.
    ///
    /// Returns [`SyncError::FatalSubscription`] once the producer failed or
    /// went away; every later call returns the same kind of error.
    pub async fn next_batch(&mut self) -> Result<Vec<RawLog>, SyncError> {
        if self.dead {
            return Err(SyncError::FatalSubscription("subscription already terminated".into()));
        }
        match self.rx.recv().await {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(e)) => {
                self.dead = true;
                Err(match e {
                    SyncError::FatalSubscription(_) => e,
                    other => SyncError::FatalSubscription(other.to_string()),
                })
            }
            None => {
                self.dead = true;
                Err(SyncError::FatalSubscription("subscription channel closed".into()))
            }
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl SubscriptionSink {
    /// Push a batch to the consumer. Empty batches are dropped.
    ///
    /// Waits while the channel is full. Returns `false` if the consumer is
    /// gone and the producer should stop.
    pub async fn deliver(&self, batch: Vec<RawLog>) -> bool {
        if batch.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(Ok(batch)).await.is_ok()
    }

    /// Signal that the channel cannot be sustained. Consumes the sink, so
    /// nothing can be delivered afterwards.
    pub async fn fail(self, error: SyncError) {
        tracing::warn!(error = %error, "log subscription failed");
        let _ = self.tx.send(Err(error)).await;
    }

    /// `true` if the consumer dropped the subscription.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
