//! Live log delivery over `eth_subscribe("logs", …)`.
//!
//! Logs arrive one notification at a time. They are grouped by block: a group
//! is handed to the consumer once a log from a later block shows up, or after
//! `idle_flush` without any new log. Any connection loss is fatal for the
//! subscription; a half-collected group is discarded, since a fresh catch-up
//! re-reads it.

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use chainsync_core::{LogFilter, LogSubscription, RawLog, SubscriptionSink, SyncError};

use crate::rpc::{filter_object, WireLog};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to `url`, subscribe to logs matching `filter` and start the
/// reader task.
///
/// Returns once the node confirmed the subscription.
pub async fn subscribe_logs(
    url: &str,
    filter: &LogFilter,
    idle_flush: Duration,
    capacity: usize,
) -> Result<LogSubscription, SyncError> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| SyncError::Connectivity(format!("websocket connect to {url}: {e}")))?;
    let (mut write, mut read) = ws.split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "eth_subscribe",
        "params": ["logs", filter_object(filter, None)],
    });
    write
        .send(Message::Text(request.to_string()))
        .await
        .map_err(|e| SyncError::Connectivity(format!("eth_subscribe send: {e}")))?;

    let sub_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_subscription_id(&mut read, &mut write))
        .await
        .map_err(|_| SyncError::Connectivity("eth_subscribe not confirmed in time".into()))??;
    info!(url, subscription = %sub_id, "log subscription established");

    let (sink, sub) = LogSubscription::channel(capacity);
    let task = tokio::spawn(pump(read, write, sub_id, sink, idle_flush));
    Ok(sub.with_task(task))
}

async fn await_subscription_id(
    read: &mut SplitStream<WsStream>,
    write: &mut SplitSink<WsStream, Message>,
) -> Result<String, SyncError> {
    while let Some(msg) = read.next().await {
        let text = match msg.map_err(|e| SyncError::Connectivity(e.to_string()))? {
            Message::Text(text) => text,
            Message::Ping(data) => {
                answer_ping(write, data).await?;
                continue;
            }
            Message::Close(frame) => {
                return Err(SyncError::Connectivity(format!(
                    "closed during eth_subscribe: {frame:?}"
                )))
            }
            _ => continue,
        };
        let v: Value = serde_json::from_str(&text)
            .map_err(|e| SyncError::Connectivity(format!("invalid eth_subscribe reply: {e}")))?;
        if v.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
            continue;
        }
        if let Some(err) = v.get("error") {
            return Err(SyncError::Connectivity(format!("eth_subscribe rejected: {err}")));
        }
        return v
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::Connectivity("eth_subscribe returned no id".into()));
    }
    Err(SyncError::Connectivity("connection closed during eth_subscribe".into()))
}

async fn answer_ping(write: &mut SplitSink<WsStream, Message>, data: Vec<u8>) -> Result<(), SyncError> {
    write
        .send(Message::Pong(data))
        .await
        .map_err(|e| SyncError::Connectivity(format!("failed to answer ping: {e}")))
}

async fn pump(
    mut read: SplitStream<WsStream>,
    mut write: SplitSink<WsStream, Message>,
    sub_id: String,
    sink: SubscriptionSink,
    idle_flush: Duration,
) {
    let mut pending: Vec<RawLog> = Vec::new();
    // Complete groups waiting for room in the channel. The socket keeps being
    // read meanwhile, so pings are answered while the consumer is busy.
    let mut ready: VecDeque<Vec<RawLog>> = VecDeque::new();

    let reason = loop {
        let waiting = !pending.is_empty();
        let delivering = !ready.is_empty();
        tokio::select! {
            // A cancelled send leaves the group at the front of the queue.
            delivered = sink.deliver(ready.front().cloned().unwrap_or_default()), if delivering => {
                if !delivered {
                    return;
                }
                ready.pop_front();
            }
            msg = read.next() => match msg {
                None => break "connection closed".to_string(),
                Some(Err(e)) => break format!("websocket error: {e}"),
                Some(Ok(Message::Text(text))) => match parse_notification(&text, &sub_id) {
                    Ok(Some(log)) => {
                        let new_block = pending
                            .last()
                            .is_some_and(|last| last.block_number != log.block_number);
                        if new_block {
                            ready.push_back(std::mem::take(&mut pending));
                        }
                        pending.push(log);
                    }
                    Ok(None) => {}
                    Err(reason) => break reason,
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = answer_ping(&mut write, data).await {
                        break e.to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => break format!("closed by server: {frame:?}"),
                Some(Ok(_)) => {}
            },
            _ = tokio::time::sleep(idle_flush), if waiting => {
                debug!(logs = pending.len(), "idle flush");
                ready.push_back(std::mem::take(&mut pending));
            }
        }
    };

    // Completed groups are whole blocks and still valid.
    for group in ready {
        if !sink.deliver(group).await {
            return;
        }
    }
    sink.fail(SyncError::FatalSubscription(reason)).await;
}

/// Extract the log from an `eth_subscription` notification for `sub_id`.
///
/// Other messages yield `Ok(None)`, as do pending logs.
fn parse_notification(text: &str, sub_id: &str) -> Result<Option<RawLog>, String> {
    let v: Value = serde_json::from_str(text).map_err(|e| format!("invalid message: {e}"))?;
    if v.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let params = v
        .get("params")
        .ok_or_else(|| "notification without params".to_string())?;
    if params.get("subscription").and_then(Value::as_str) != Some(sub_id) {
        return Ok(None);
    }
    let log: WireLog = serde_json::from_value(params.get("result").cloned().unwrap_or_default())
        .map_err(|e| format!("malformed log notification: {e}"))?;
    Ok(log.into_raw())
}
