//! The sync state machine.
//!
//! # INIT
//! Read the checkpoint (`pointer = last + 1`, or the start block when none
//! exists) and the chain head.
//!
//! # CATCHUP
//! Replay `[pointer, head]` in bounded windows. Each window is fetched,
//! timestamped, decoded and persisted together with its checkpoint in one
//! transaction; only a committed window moves the pointer.
//!
//! # REALTIME
//! Subscribe, close the gap mined during catch-up, then persist every live
//! batch with its highest block as checkpoint. A dead subscription either
//! terminates the run or, if resubscription is enabled, restarts at INIT.

use std::convert::Infallible;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use tracing::{error, info, warn};

use chainsync_core::{
    decode_transfer, lower_hex, BatchAck, BlockRange, ChainDataSource, LogFilter,
    LogSubscription, RawLog, RetryPolicy, SyncConfig, SyncError, SyncPhase, TransferEvent,
    TransferStore,
};

use crate::timestamps::BlockTimestampResolver;

// ─── SyncProgress ─────────────────────────────────────────────────────────────

/// Shared, read-only view of a running orchestrator.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<ProgressState>,
}

#[derive(Debug)]
struct ProgressState {
    phase: AtomicU8,
    pointer: AtomicU64,
}

impl SyncProgress {
    fn new(pointer: u64) -> Self {
        Self {
            inner: Arc::new(ProgressState {
                phase: AtomicU8::new(phase_code(SyncPhase::Init)),
                pointer: AtomicU64::new(pointer),
            }),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        match self.inner.phase.load(Ordering::Acquire) {
            0 => SyncPhase::Init,
            1 => SyncPhase::CatchUp,
            2 => SyncPhase::Realtime,
            _ => SyncPhase::Failed,
        }
    }

    /// Next block that has not been committed yet.
    pub fn pointer(&self) -> u64 {
        self.inner.pointer.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.inner.phase.store(phase_code(phase), Ordering::Release);
    }

    fn set_pointer(&self, pointer: u64) {
        self.inner.pointer.store(pointer, Ordering::Release);
    }
}

fn phase_code(phase: SyncPhase) -> u8 {
    match phase {
        SyncPhase::Init => 0,
        SyncPhase::CatchUp => 1,
        SyncPhase::Realtime => 2,
        SyncPhase::Failed => 3,
    }
}

// ─── SyncOrchestrator ─────────────────────────────────────────────────────────

/// Drives one contract from its checkpoint to the chain head and keeps it
/// there.
pub struct SyncOrchestrator<S: ?Sized, St: ?Sized> {
    source: Arc<S>,
    store: Arc<St>,
    filter: LogFilter,
    contract: String,
    config: SyncConfig,
    resolver: BlockTimestampResolver,
    retry: RetryPolicy,
    progress: SyncProgress,
}

impl<S, St> SyncOrchestrator<S, St>
where
    S: ChainDataSource + ?Sized,
    St: TransferStore + ?Sized,
{
    /// Fails with [`SyncError::Config`] if `contract` is not a 20-byte hex
    /// address.
    pub fn new(
        source: Arc<S>,
        store: Arc<St>,
        contract: &str,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let address = Address::from_str(contract.trim())
            .map_err(|e| SyncError::Config(format!("invalid contract address {contract:?}: {e}")))?;
        Ok(Self {
            source,
            store,
            filter: LogFilter::transfers(address),
            contract: lower_hex(address.as_slice()),
            resolver: BlockTimestampResolver::new(
                config.timestamp_chunk_size,
                config.timestamp_pacing,
            ),
            retry: RetryPolicy::new(config.retry.clone()),
            progress: SyncProgress::new(config.start_block),
            config,
        })
    }

    /// Lower-case `0x` address of the watched contract.
    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        self.progress.phase()
    }

    pub fn pointer(&self) -> u64 {
        self.progress.pointer()
    }

    /// A handle that keeps reporting phase and pointer while [`run`](Self::run)
    /// is in progress.
    pub fn progress(&self) -> SyncProgress {
        self.progress.clone()
    }

    /// Run until an unrecoverable error. Never returns `Ok`.
    pub async fn run(&self) -> Result<(), SyncError> {
        let err = match self.drive().await {
            Ok(never) => match never {},
            Err(e) => e,
        };
        self.progress.set_phase(SyncPhase::Failed);
        error!(error = %err, pointer = self.pointer(), contract = %self.contract, "sync terminated");
        Err(err)
    }

    async fn drive(&self) -> Result<Infallible, SyncError> {
        let mut resubscribes = 0u32;
        loop {
            self.sync_to_head().await?;

            let failure = match self.source.subscribe(&self.filter).await {
                Ok(mut sub) => {
                    // Blocks mined while catching up arrived before the
                    // subscription existed.
                    self.catch_up_to_head().await?;
                    self.progress.set_phase(SyncPhase::Realtime);
                    info!(pointer = self.pointer(), "realtime sync started");
                    self.consume(&mut sub).await
                }
                Err(e) if e.is_fatal() => e,
                Err(e) => SyncError::FatalSubscription(format!("subscribe failed: {e}")),
            };

            if !failure.is_fatal() || resubscribes >= self.config.max_resubscribes {
                return Err(failure);
            }
            resubscribes += 1;
            warn!(
                attempt = resubscribes,
                max = self.config.max_resubscribes,
                error = %failure,
                "live subscription lost, resynchronizing"
            );
        }
    }

    /// INIT followed by CATCHUP up to the head observed during INIT.
    ///
    /// Returns that head.
    pub async fn sync_to_head(&self) -> Result<u64, SyncError> {
        self.progress.set_phase(SyncPhase::Init);
        let stored = with_retry(&self.retry, "read checkpoint", move || {
            self.store.read_checkpoint(&self.contract)
        })
        .await?;
        let pointer = match stored {
            Some(last) => last.saturating_add(1),
            None => self.config.start_block,
        };
        self.progress.set_pointer(pointer);
        info!(contract = %self.contract, checkpoint = ?stored, pointer, "sync initialized");

        self.catch_up_to_head().await
    }

    async fn catch_up_to_head(&self) -> Result<u64, SyncError> {
        let head = with_retry(&self.retry, "read head", move || self.source.current_height()).await?;
        self.catch_up(head).await?;
        Ok(head)
    }

    async fn catch_up(&self, head: u64) -> Result<(), SyncError> {
        self.progress.set_phase(SyncPhase::CatchUp);
        let configured = self.config.batch_window.max(1);
        let mut window = configured;
        let mut attempt = 0u32;

        while self.pointer() <= head {
            let range = BlockRange::window(self.pointer(), head, window);
            match self.sync_range(range).await {
                Ok(ack) => {
                    info!(
                        from = range.from,
                        to = range.to,
                        head,
                        inserted = ack.inserted,
                        duplicates = ack.duplicates,
                        checkpoint = ack.checkpoint,
                        "range committed"
                    );
                    self.progress.set_pointer(range.to + 1);
                    window = configured;
                    attempt = 0;
                }
                Err(e) if e.is_range_too_large() && range.block_count() > 1 => {
                    window = range.halved().block_count();
                    warn!(%range, window, error = %e, "range rejected, shrinking window");
                }
                // A one-block range cannot shrink further; back off instead.
                Err(e) if e.is_retryable() || e.is_range_too_large() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            warn!(
                                %range,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "range failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(give_up(&format!("range {range}"), attempt, e)),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn sync_range(&self, range: BlockRange) -> Result<BatchAck, SyncError> {
        let logs = self.source.get_logs(&self.filter, range.from, range.to).await?;
        let events = self.build_events(&logs).await?;
        self.store.persist_batch(&events, range.to, &self.contract).await
    }

    async fn consume(&self, sub: &mut LogSubscription) -> SyncError {
        loop {
            let logs = match sub.next_batch().await {
                Ok(logs) => logs,
                Err(e) => return e,
            };
            if let Err(e) = self.apply_live(logs).await {
                return e;
            }
        }
    }

    async fn apply_live(&self, logs: Vec<RawLog>) -> Result<(), SyncError> {
        let Some(max_block) = logs.iter().filter(|l| !l.removed).map(|l| l.block_number).max()
        else {
            warn!(logs = logs.len(), "live batch holds only removed logs, skipping");
            return Ok(());
        };

        let batch = &logs;
        let ack = with_retry(&self.retry, "live batch", move || async move {
            let events = self.build_events(batch).await?;
            self.store.persist_batch(&events, max_block, &self.contract).await
        })
        .await?;

        self.progress.set_pointer(self.pointer().max(max_block + 1));
        info!(
            logs = logs.len(),
            max_block,
            inserted = ack.inserted,
            duplicates = ack.duplicates,
            checkpoint = ack.checkpoint,
            "live batch committed"
        );
        Ok(())
    }

    /// Drop removed logs, resolve timestamps and decode.
    async fn build_events(&self, logs: &[RawLog]) -> Result<Vec<TransferEvent>, SyncError> {
        let live: Vec<RawLog> = logs
            .iter()
            .filter(|l| {
                if l.removed {
                    warn!(
                        tx_hash = %lower_hex(l.tx_hash.as_slice()),
                        log_index = l.log_index,
                        block = l.block_number,
                        "skipping removed log"
                    );
                }
                !l.removed
            })
            .cloned()
            .collect();

        let stamps = self.resolver.resolve(&*self.source, &live).await?;
        live.iter()
            .map(|log| {
                let ts = stamps.get(&log.block_number).copied().ok_or_else(|| {
                    SyncError::Connectivity(format!("no timestamp for block {}", log.block_number))
                })?;
                decode_transfer(log, ts)
            })
            .collect()
    }
}

/// Run `op`, retrying retryable failures with the policy's backoff.
async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                attempt += 1;
                match policy.next_delay(attempt) {
                    Some(delay) => {
                        warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(give_up(what, attempt, e)),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn give_up(what: &str, attempts: u32, last: SyncError) -> SyncError {
    SyncError::Aborted {
        reason: format!("{what} failed after {attempts} attempt(s): {last}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_round_trips_phases() {
        let progress = SyncProgress::new(5);
        assert_eq!(progress.phase(), SyncPhase::Init);
        for phase in [SyncPhase::CatchUp, SyncPhase::Realtime, SyncPhase::Failed] {
            progress.set_phase(phase);
            assert_eq!(progress.phase(), phase);
        }
        progress.set_pointer(42);
        assert_eq!(progress.clone().pointer(), 42);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_budget() {
        let policy = RetryPolicy::new(chainsync_core::RetryConfig {
            max_retries: 2,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(1),
            multiplier: 1.0,
        });
        let mut calls = 0;
        let err = with_retry(&policy, "probe", || {
            calls += 1;
            async { Err::<(), _>(SyncError::Connectivity("down".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, SyncError::Aborted { .. }));
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_decode_errors() {
        let mut calls = 0;
        let err = with_retry(&RetryPolicy::default(), "probe", || {
            calls += 1;
            async {
                Err::<(), _>(SyncError::Decode {
                    tx_hash: "0x00".into(),
                    log_index: 0,
                    reason: "bad".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, SyncError::Decode { .. }));
    }
}
