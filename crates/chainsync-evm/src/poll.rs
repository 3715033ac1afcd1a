//! Polling fallback for endpoints without WebSocket support.
//!
//! Follows the head every `interval` and delivers the logs of each newly seen
//! block span as one batch. Transient failures are retried in place using the
//! configured backoff; once the budget is spent the subscription fails.

use std::time::Duration;

use tracing::{debug, warn};

use chainsync_core::{
    LogFilter, LogSubscription, RetryConfig, RetryPolicy, SubscriptionSink, SyncError,
};

use crate::rpc::HttpRpcClient;

/// Largest block span fetched by a single poll.
const MAX_POLL_SPAN: u64 = 100;

/// Start polling from the current head.
pub async fn poll_logs(
    rpc: HttpRpcClient,
    filter: LogFilter,
    interval: Duration,
    retry: RetryConfig,
    capacity: usize,
) -> Result<LogSubscription, SyncError> {
    let head = rpc.block_number().await?;
    let (sink, sub) = LogSubscription::channel(capacity);
    let task = tokio::spawn(poll_loop(rpc, filter, head, interval, RetryPolicy::new(retry), sink));
    Ok(sub.with_task(task))
}

async fn poll_loop(
    rpc: HttpRpcClient,
    filter: LogFilter,
    mut last_seen: u64,
    interval: Duration,
    retry: RetryPolicy,
    sink: SubscriptionSink,
) {
    let mut failures = 0u32;
    loop {
        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(interval).await;

        match poll_once(&rpc, &filter, last_seen, &sink).await {
            Ok(Some(seen)) => {
                last_seen = seen;
                failures = 0;
            }
            Ok(None) => failures = 0,
            Err(PollStop::ConsumerGone) => return,
            Err(PollStop::Failed(e)) => {
                failures += 1;
                match retry.next_delay(failures) {
                    Some(delay) => {
                        warn!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %e, "poll failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        sink.fail(SyncError::FatalSubscription(format!(
                            "polling gave up after {failures} failures: {e}"
                        )))
                        .await;
                        return;
                    }
                }
            }
        }
    }
}

enum PollStop {
    ConsumerGone,
    Failed(SyncError),
}

/// One poll. Returns the new high-water mark, or `None` if the head did not
/// move.
async fn poll_once(
    rpc: &HttpRpcClient,
    filter: &LogFilter,
    last_seen: u64,
    sink: &SubscriptionSink,
) -> Result<Option<u64>, PollStop> {
    let head = rpc.block_number().await.map_err(PollStop::Failed)?;
    if head <= last_seen {
        return Ok(None);
    }
    let from = last_seen + 1;
    let to = head.min(from + MAX_POLL_SPAN - 1);
    let logs = rpc.get_logs(filter, from, to).await.map_err(PollStop::Failed)?;
    debug!(from, to, logs = logs.len(), "poll");
    if !sink.deliver(logs).await {
        return Err(PollStop::ConsumerGone);
    }
    Ok(Some(to))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use alloy_primitives::Address;

    use super::*;
    use crate::test_node::{log_json, quantity, spawn_node};

    fn quick_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    async fn client(url: String) -> HttpRpcClient {
        HttpRpcClient::new(url, Duration::from_secs(5)).unwrap()
    }

    /// Node whose head is `head` and whose `eth_getLogs` returns one log at
    /// `fromBlock`, recording every requested span.
    async fn chain(head: Arc<AtomicU64>, spans: Arc<Mutex<Vec<(u64, u64)>>>) -> String {
        spawn_node(move |method, params| match method {
            "eth_blockNumber" => Ok(format!("{:#x}", head.load(Ordering::SeqCst)).into()),
            "eth_getLogs" => {
                let from = quantity(&params[0]["fromBlock"]);
                let to = quantity(&params[0]["toBlock"]);
                spans.lock().unwrap().push((from, to));
                Ok(serde_json::json!([log_json(from, 0)]))
            }
            other => Err((-32601, format!("method {other} not found"))),
        })
        .await
    }

    #[tokio::test]
    async fn delivers_blocks_past_the_starting_head() {
        let head = Arc::new(AtomicU64::new(100));
        let spans = Arc::new(Mutex::new(Vec::new()));
        let url = chain(head.clone(), spans.clone()).await;

        let mut sub = poll_logs(
            client(url).await,
            LogFilter::transfers(Address::ZERO),
            Duration::from_millis(10),
            quick_retry(3),
            8,
        )
        .await
        .unwrap();
        head.store(103, Ordering::SeqCst);

        let batch = tokio::time::timeout(Duration::from_secs(5), sub.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].block_number, 101);
        assert_eq!(spans.lock().unwrap()[0], (101, 103));
    }

    #[tokio::test]
    async fn large_head_jumps_are_split() {
        let head = Arc::new(AtomicU64::new(100));
        let spans = Arc::new(Mutex::new(Vec::new()));
        let url = chain(head.clone(), spans.clone()).await;

        let mut sub = poll_logs(
            client(url).await,
            LogFilter::transfers(Address::ZERO),
            Duration::from_millis(10),
            quick_retry(3),
            8,
        )
        .await
        .unwrap();
        head.store(350, Ordering::SeqCst);

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), sub.next_batch())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(
            spans.lock().unwrap()[..3],
            [(101, 200), (201, 300), (301, 350)]
        );
    }

    #[tokio::test]
    async fn persistent_failures_end_the_subscription() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let url = spawn_node(move |method, _| match method {
            // The first call (the starting head) succeeds; every poll fails.
            "eth_blockNumber" if counter.fetch_add(1, Ordering::SeqCst) == 0 => Ok("0x64".into()),
            _ => Err((-32000, "upstream unavailable".into())),
        })
        .await;

        let mut sub = poll_logs(
            client(url).await,
            LogFilter::transfers(Address::ZERO),
            Duration::from_millis(5),
            quick_retry(2),
            8,
        )
        .await
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), sub.next_batch())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SyncError::FatalSubscription(_)));
        // Starting head plus the first try and two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn start_fails_when_head_is_unreadable() {
        let url = spawn_node(|_, _| Err((-32000, "down".into()))).await;
        let err = poll_logs(
            client(url).await,
            LogFilter::transfers(Address::ZERO),
            Duration::from_millis(5),
            quick_retry(0),
            8,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SyncError::Connectivity(_)));
    }
}
