//! [`ChainDataSource`] over Ethereum JSON-RPC.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use chainsync_core::{ChainDataSource, LogFilter, LogSubscription, RawLog, RetryConfig, SyncError};

use crate::poll::poll_logs;
use crate::rpc::HttpRpcClient;
use crate::ws::subscribe_logs;

/// Endpoint and live-delivery settings for [`EvmDataSource`].
#[derive(Debug, Clone)]
pub struct EvmSourceConfig {
    /// HTTP JSON-RPC endpoint. Derived from `ws_url` when absent.
    pub http_url: Option<String>,
    /// WebSocket endpoint. Without it, live delivery falls back to polling.
    pub ws_url: Option<String>,
    pub request_timeout: Duration,
    /// Quiet period after which a partial WebSocket block group is delivered.
    pub idle_flush: Duration,
    pub poll_interval: Duration,
    /// Backoff for transient failures inside the polling subscription.
    pub poll_retry: RetryConfig,
    /// Undelivered batches buffered between producer and consumer.
    pub channel_capacity: usize,
}

impl Default for EvmSourceConfig {
    fn default() -> Self {
        Self {
            http_url: None,
            ws_url: None,
            request_timeout: Duration::from_secs(30),
            idle_flush: Duration::from_millis(250),
            poll_interval: Duration::from_secs(4),
            poll_retry: RetryConfig::default(),
            channel_capacity: 64,
        }
    }
}

/// JSON-RPC backed chain data source.
pub struct EvmDataSource {
    rpc: HttpRpcClient,
    config: EvmSourceConfig,
}

impl EvmDataSource {
    pub fn new(config: EvmSourceConfig) -> Result<Self, SyncError> {
        let http_url = match (&config.http_url, &config.ws_url) {
            (Some(http), _) => http.clone(),
            (None, Some(ws)) => http_url_from_ws(ws)?,
            (None, None) => {
                return Err(SyncError::Config(
                    "an HTTP or WebSocket RPC endpoint is required".into(),
                ))
            }
        };
        let rpc = HttpRpcClient::new(http_url, config.request_timeout)?;
        let live = if config.ws_url.is_some() { "websocket" } else { "polling" };
        info!(http = rpc.url(), live, "rpc data source configured");
        Ok(Self { rpc, config })
    }

    pub fn rpc(&self) -> &HttpRpcClient {
        &self.rpc
    }
}

/// `wss://host/path` → `https://host/path`, `ws://…` → `http://…`.
pub fn http_url_from_ws(ws_url: &str) -> Result<String, SyncError> {
    if let Some(rest) = ws_url.strip_prefix("wss://") {
        Ok(format!("https://{rest}"))
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        Ok(format!("http://{rest}"))
    } else {
        Err(SyncError::Config(format!(
            "websocket url must start with ws:// or wss://, got {ws_url:?}"
        )))
    }
}

#[async_trait]
impl ChainDataSource for EvmDataSource {
    async fn current_height(&self) -> Result<u64, SyncError> {
        self.rpc.block_number().await
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        self.rpc.get_logs(filter, from, to).await
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, SyncError> {
        self.rpc.block_timestamp(block_number).await
    }

    async fn subscribe(&self, filter: &LogFilter) -> Result<LogSubscription, SyncError> {
        match &self.config.ws_url {
            Some(url) => {
                subscribe_logs(url, filter, self.config.idle_flush, self.config.channel_capacity)
                    .await
            }
            None => {
                poll_logs(
                    self.rpc.clone(),
                    *filter,
                    self.config.poll_interval,
                    self.config.poll_retry.clone(),
                    self.config.channel_capacity,
                )
                .await
            }
        }
    }
}
