//! In-memory storage backend.
//!
//! Stores transfers and checkpoints in RAM. Batches are staged and applied
//! under one lock, so a failed batch leaves no trace. Failures can be
//! injected to exercise rollback paths in tests.
//!
//! All data is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use chainsync_core::{
    BatchAck, Page, PageRequest, Pagination, SyncCheckpoint, SyncError, TransferEvent,
    TransferQuery, TransferRecord, TransferStore,
};

#[derive(Default)]
struct MemoryState {
    transfers: BTreeMap<(String, u32), TransferRecord>,
    checkpoints: BTreeMap<String, u64>,
    /// Every committed checkpoint value, in commit order.
    history: Vec<(String, u64)>,
}

#[derive(Default)]
struct Faults {
    /// Fail the next batch when it reaches its n-th insert (1-based).
    insert: Option<usize>,
    /// Fail this many upcoming batches at commit time.
    commits: u32,
}

/// In-memory transfer store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    faults: Mutex<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next batch fail on its `n`-th insert (1-based). One-shot.
    pub fn fail_on_insert(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert = Some(n);
        }
    }

    /// Make the next `count` batches fail just before commit.
    pub fn fail_next_commits(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.commits = count;
        }
    }

    /// Total number of stored transfers.
    pub fn transfer_count(&self) -> usize {
        self.state.lock().map(|s| s.transfers.len()).unwrap_or(0)
    }

    /// All stored transfers in `(tx_hash, log_index)` order.
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state
            .lock()
            .map(|s| s.transfers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Checkpoint values committed for `contract`, oldest first.
    pub fn checkpoint_history(&self, contract: &str) -> Vec<u64> {
        self.state
            .lock()
            .map(|s| {
                s.history
                    .iter()
                    .filter(|(c, _)| c == contract)
                    .map(|(_, b)| *b)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_insert_fault(&self) -> Result<Option<usize>, SyncError> {
        Ok(self.faults.lock().map_err(poisoned)?.insert.take())
    }

    fn take_commit_fault(&self) -> Result<bool, SyncError> {
        let mut faults = self.faults.lock().map_err(poisoned)?;
        if faults.commits > 0 {
            faults.commits -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SyncError {
    SyncError::Persistence("memory store lock poisoned".into())
}

#[async_trait]
impl TransferStore for InMemoryStore {
    async fn persist_batch(
        &self,
        events: &[TransferEvent],
        checkpoint_block: u64,
        contract: &str,
    ) -> Result<BatchAck, SyncError> {
        let insert_fault = self.take_insert_fault()?;
        let contract = contract.to_ascii_lowercase();
        let mut state = self.state.lock().map_err(poisoned)?;

        // Stage everything first; state is only touched on commit.
        let now = Utc::now();
        let mut staged: BTreeMap<(String, u32), TransferRecord> = BTreeMap::new();
        let mut duplicates = 0u64;
        for (i, event) in events.iter().enumerate() {
            if insert_fault == Some(i + 1) {
                return Err(SyncError::Persistence(format!(
                    "injected failure on insert {} of {}",
                    i + 1,
                    events.len()
                )));
            }
            let key = (event.tx_hash.clone(), event.log_index);
            if state.transfers.contains_key(&key) || staged.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            staged.insert(
                key,
                TransferRecord {
                    event: event.clone(),
                    created_at: now,
                },
            );
        }

        if self.take_commit_fault()? {
            return Err(SyncError::Persistence("injected commit failure".into()));
        }

        let inserted = staged.len() as u64;
        state.transfers.extend(staged);
        let stored = state.checkpoints.entry(contract.clone()).or_insert(checkpoint_block);
        *stored = (*stored).max(checkpoint_block);
        let checkpoint = *stored;
        state.history.push((contract, checkpoint));

        Ok(BatchAck {
            inserted,
            duplicates,
            checkpoint,
        })
    }

    async fn read_checkpoint(&self, contract: &str) -> Result<Option<u64>, SyncError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.checkpoints.get(&contract.to_ascii_lowercase()).copied())
    }
}

#[async_trait]
impl TransferQuery for InMemoryStore {
    async fn transfers_for_address(
        &self,
        address: &str,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, SyncError> {
        let address = address.to_ascii_lowercase();
        let state = self.state.lock().map_err(poisoned)?;

        let mut matching: Vec<&TransferRecord> = state
            .transfers
            .values()
            .filter(|r| r.event.from_address == address || r.event.to_address == address)
            .collect();
        matching.sort_by(|a, b| {
            (b.event.block_number, b.event.log_index).cmp(&(a.event.block_number, a.event.log_index))
        });

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok(Page {
            data,
            pagination: Pagination::new(page, total),
        })
    }

    async fn sync_status(&self) -> Result<Vec<SyncCheckpoint>, SyncError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .checkpoints
            .iter()
            .map(|(contract, block)| SyncCheckpoint {
                contract_address: contract.clone(),
                last_synced_block: *block,
            })
            .collect())
    }
}
