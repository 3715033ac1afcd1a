//! HTTP JSON-RPC client for the three calls the sync engine needs:
//! `eth_blockNumber`, `eth_getLogs` and `eth_getBlockByNumber`.
//!
//! Node and transport failures are mapped onto [`SyncError`]: a node that
//! refuses a log query because of its block-range or result-count limit
//! yields [`SyncError::RangeTooLarge`], everything else is
//! [`SyncError::Connectivity`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U64};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use chainsync_core::{lower_hex, LogFilter, RawLog, SyncError};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Vec<Value>,
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A log object as returned by `eth_getLogs` and `eth_subscribe("logs")`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    block_hash: Option<B256>,
    transaction_hash: Option<B256>,
    log_index: Option<U64>,
    #[serde(default)]
    removed: bool,
}

impl WireLog {
    /// `None` for pending logs, which carry no block position yet.
    pub(crate) fn into_raw(self) -> Option<RawLog> {
        let log_index = u32::try_from(self.log_index?.to::<u64>()).ok()?;
        Some(RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number: self.block_number?.to::<u64>(),
            block_hash: self.block_hash?,
            tx_hash: self.transaction_hash?,
            log_index,
            removed: self.removed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    timestamp: U64,
}

/// `eth_getLogs` / `eth_subscribe` filter object for `filter`.
pub(crate) fn filter_object(filter: &LogFilter, range: Option<(u64, u64)>) -> Value {
    let mut obj = serde_json::json!({
        "address": lower_hex(filter.address.as_slice()),
        "topics": [lower_hex(filter.event_signature.as_slice())],
    });
    if let Some((from, to)) = range {
        obj["fromBlock"] = Value::String(format!("{from:#x}"));
        obj["toBlock"] = Value::String(format!("{to:#x}"));
    }
    obj
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Failure of a single JSON-RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, timeout, TLS failure, …
    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Node(JsonRpcError),

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Message fragments used by providers to reject log queries that span too
/// many blocks or return too many results.
const RANGE_LIMIT_HINTS: &[&str] = &[
    "query returned more than",
    "block range",
    "range too large",
    "range is too large",
    "too many blocks",
    "response size exceeded",
    "result limit exceeded",
    "log response size",
];

/// Throttling replies. Some providers send these with the same `-32005` code
/// as range rejections.
const RATE_LIMIT_HINTS: &[&str] = &[
    "rate limit",
    "request rate",
    "rate exceeded",
    "too many requests",
    "exceeded its compute units",
    "capacity exceeded",
];

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

impl RpcError {
    /// Returns `true` if the node refused the query because of its size.
    ///
    /// Decided by the message alone: `-32005` is shared with rate limiting.
    pub fn is_range_limit(&self) -> bool {
        let text = match self {
            Self::Node(err) => err.message.to_ascii_lowercase(),
            Self::Status { status, .. } if *status == HTTP_TOO_MANY_REQUESTS => return false,
            Self::Status { body, .. } => body.to_ascii_lowercase(),
            _ => return false,
        };
        if RATE_LIMIT_HINTS.iter().any(|hint| text.contains(hint)) {
            return false;
        }
        RANGE_LIMIT_HINTS.iter().any(|hint| text.contains(hint))
    }

    /// Classify a failed `eth_getLogs` call over `[from, to]`.
    pub fn for_range(self, from: u64, to: u64) -> SyncError {
        if self.is_range_limit() {
            SyncError::RangeTooLarge {
                from,
                to,
                reason: self.to_string(),
            }
        } else {
            self.into()
        }
    }
}

impl From<RpcError> for SyncError {
    fn from(e: RpcError) -> Self {
        SyncError::Connectivity(e.to_string())
    }
}

// ─── HttpRpcClient ────────────────────────────────────────────────────────────

/// HTTP JSON-RPC client. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct HttpRpcClient {
    url: Arc<str>,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl HttpRpcClient {
    /// Create a client for `url` whose requests give up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        let url: String = url.into();
        Ok(Self {
            url: url.into(),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and decode its `result` as `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let resp = self
            .http
            .post(&*self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Status { status, body });
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        let value = body.into_result().map_err(RpcError::Node)?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }

    pub async fn block_number(&self) -> Result<u64, SyncError> {
        let n: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(n.to::<u64>())
    }

    pub async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        let logs: Vec<WireLog> = self
            .call("eth_getLogs", vec![filter_object(filter, Some((from, to)))])
            .await
            .map_err(|e| e.for_range(from, to))?;
        Ok(logs.into_iter().filter_map(WireLog::into_raw).collect())
    }

    pub async fn block_timestamp(&self, block_number: u64) -> Result<u64, SyncError> {
        let block: Option<WireBlock> = self
            .call(
                "eth_getBlockByNumber",
                vec![Value::String(format!("{block_number:#x}")), Value::Bool(false)],
            )
            .await?;
        block
            .map(|b| b.timestamp.to::<u64>())
            .ok_or_else(|| SyncError::Connectivity(format!("block {block_number} not found")))
    }
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient").field("url", &self.url).finish()
    }
}
