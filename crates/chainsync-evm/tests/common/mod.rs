//! Scriptable in-memory chain for orchestrator tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use chainsync_core::{
    transfer_topic, ChainDataSource, LogFilter, LogSubscription, RawLog, RetryConfig,
    SubscriptionSink, SyncConfig, SyncError,
};

pub const CONTRACT: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
pub const ALICE: &str = "0x1111111111111111111111111111111111111111";
pub const BOB: &str = "0x2222222222222222222222222222222222222222";

pub fn contract_address() -> Address {
    CONTRACT.parse().unwrap()
}

/// A well-formed `Transfer` log from [`ALICE`] to [`BOB`].
pub fn transfer_log(block: u64, log_index: u32, amount: u64) -> RawLog {
    let mut tx = [0u8; 32];
    tx[..8].copy_from_slice(&block.to_be_bytes());
    tx[8..12].copy_from_slice(&log_index.to_be_bytes());
    RawLog {
        address: contract_address(),
        topics: vec![
            transfer_topic(),
            B256::left_padding_from(ALICE.parse::<Address>().unwrap().as_slice()),
            B256::left_padding_from(BOB.parse::<Address>().unwrap().as_slice()),
        ],
        data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
        block_number: block,
        block_hash: B256::with_last_byte(block as u8),
        tx_hash: B256::from(tx),
        log_index,
        removed: false,
    }
}

pub fn timestamp_of(block: u64) -> u64 {
    1_600_000_000 + block * 12
}

/// Config with millisecond backoff so retry tests stay fast.
pub fn fast_config(start_block: u64) -> SyncConfig {
    SyncConfig {
        start_block,
        timestamp_pacing: Duration::from_millis(1),
        retry: RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..SyncConfig::default()
    }
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<RawLog>,
    get_logs_calls: Vec<(u64, u64)>,
    /// Fail this many upcoming `get_logs` calls with a connectivity error.
    failing_get_logs: u32,
    /// Errors returned, in order, by the next `get_logs` calls.
    scripted_get_logs: VecDeque<SyncError>,
    /// Reject `get_logs` spans longer than this.
    max_span: Option<u64>,
    subscribe_calls: u32,
    fail_subscribe: bool,
    /// Head and logs that appear at the moment `subscribe` is called.
    on_subscribe: Option<(u64, Vec<RawLog>)>,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
    sink: tokio::sync::Mutex<Option<SubscriptionSink>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        chain
    }

    pub fn with_logs(head: u64, logs: Vec<RawLog>) -> Self {
        let chain = Self::new(head);
        chain.state.lock().unwrap().logs = logs;
        chain
    }

    /// Mine new blocks: move the head and append their logs.
    pub fn mine(&self, head: u64, logs: Vec<RawLog>) {
        let mut state = self.state.lock().unwrap();
        state.head = head;
        state.logs.extend(logs);
    }

    pub fn fail_next_get_logs(&self, n: u32) {
        self.state.lock().unwrap().failing_get_logs = n;
    }

    /// Answer the next `get_logs` call with `err`.
    pub fn fail_next_get_logs_with(&self, err: SyncError) {
        self.state.lock().unwrap().scripted_get_logs.push_back(err);
    }

    pub fn limit_span(&self, max: u64) {
        self.state.lock().unwrap().max_span = Some(max);
    }

    pub fn fail_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = true;
    }

    pub fn mine_on_subscribe(&self, head: u64, logs: Vec<RawLog>) {
        self.state.lock().unwrap().on_subscribe = Some((head, logs));
    }

    pub fn get_logs_calls(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().get_logs_calls.clone()
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.state.lock().unwrap().subscribe_calls
    }

    /// Wait until `n` subscriptions were opened and one is live.
    pub async fn wait_for_subscription(&self, n: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.subscribe_calls() >= n && self.sink.lock().await.is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription was not opened in time");
    }

    /// Push a live batch to the current subscriber.
    pub async fn push_live(&self, batch: Vec<RawLog>) {
        let sink = self.sink.lock().await;
        let sink = sink.as_ref().expect("no live subscription");
        assert!(sink.deliver(batch).await, "subscriber went away");
    }

    /// Kill the current subscription with a fatal error.
    pub async fn kill_subscription(&self) {
        if let Some(sink) = self.sink.lock().await.take() {
            sink.fail(SyncError::FatalSubscription("socket closed".into())).await;
        }
    }
}

#[async_trait]
impl ChainDataSource for MockChain {
    async fn current_height(&self) -> Result<u64, SyncError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.get_logs_calls.push((from, to));
        if let Some(err) = state.scripted_get_logs.pop_front() {
            return Err(err);
        }
        if state.failing_get_logs > 0 {
            state.failing_get_logs -= 1;
            return Err(SyncError::Connectivity("connection reset".into()));
        }
        if let Some(max) = state.max_span {
            if to - from + 1 > max {
                return Err(SyncError::RangeTooLarge {
                    from,
                    to,
                    reason: format!("more than {max} blocks"),
                });
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| l.address == filter.address)
            .filter(|l| (from..=to).contains(&l.block_number))
            .cloned()
            .collect())
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, SyncError> {
        Ok(timestamp_of(block_number))
    }

    async fn subscribe(&self, _filter: &LogFilter) -> Result<LogSubscription, SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            state.subscribe_calls += 1;
            if state.fail_subscribe {
                return Err(SyncError::Connectivity("websocket refused".into()));
            }
            if let Some((head, logs)) = state.on_subscribe.take() {
                state.head = head;
                state.logs.extend(logs);
            }
        }
        let (sink, sub) = LogSubscription::channel(16);
        *self.sink.lock().await = Some(sink);
        Ok(sub)
    }
}
