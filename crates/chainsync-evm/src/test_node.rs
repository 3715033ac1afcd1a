//! Minimal HTTP JSON-RPC node for unit tests.
//!
//! Every connection serves exactly one request and is then closed.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// `Ok(result)` or `Err((code, message))` for a JSON-RPC call.
pub(crate) type Reply = Result<Value, (i64, String)>;

/// Serve `handler` on a random local port; returns the endpoint URL.
pub(crate) async fn spawn_node<F>(handler: F) -> String
where
    F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let _ = serve_one(stream, &*handler).await;
            });
        }
    });
    url
}

async fn serve_one<F>(mut stream: TcpStream, handler: &F) -> std::io::Result<()>
where
    F: Fn(&str, &Value) -> Reply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length: usize = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request: Value = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default();
    let body = match handler(method, &request["params"]) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": request["id"], "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message},
        }),
    }
    .to_string();

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// An `eth_getLogs` entry at `block`.
pub(crate) fn log_json(block: u64, log_index: u64) -> Value {
    json!({
        "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "topics": [format!("0x{}", "dd".repeat(32))],
        "data": "0x",
        "blockNumber": format!("{block:#x}"),
        "blockHash": format!("0x{}", "ab".repeat(32)),
        "transactionHash": format!("0x{:064x}", block * 1_000 + log_index),
        "logIndex": format!("{log_index:#x}"),
        "removed": false
    })
}

/// Parse a hex quantity such as `"0x1f"`.
pub(crate) fn quantity(v: &Value) -> u64 {
    let s = v.as_str().unwrap_or_default().trim_start_matches("0x");
    u64::from_str_radix(s, 16).unwrap_or_default()
}
