//! HTTP JSON-RPC client backed by `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use holonindex_core::error::IndexerError;
use holonindex_core::retry::{RetryConfig, RetryPolicy};

use crate::fetcher::{parse_hex_u64, EvmRpcClient, RpcBlock, RpcLog};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_retries: 2,
                ..RetryConfig::default()
            },
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC over HTTP with retry on transport failures.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Rpc(format!("failed to build http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    async fn send_once(&self, req: &JsonRpcRequest<'_>) -> Result<JsonRpcResponse, IndexerError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))
    }

    /// Send one call and deserialize its `result`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, IndexerError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut attempt = 0u32;
        let resp = loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => break resp,
                Err(e) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url = %self.url,
                            method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, url = %self.url, method, "max retries exceeded");
                        return Err(e);
                    }
                },
            }
        };

        if let Some(err) = resp.error {
            return Err(IndexerError::Rpc(format!("{method}: {} (code {})", err.message, err.code)));
        }
        let result = resp.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| IndexerError::Rpc(format!("{method}: bad result: {e}")))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<Option<RpcBlock>, IndexerError> {
        self.call(
            "eth_getBlockByNumber",
            json!([format!("0x{number:x}"), full_transactions]),
        )
        .await
    }

    async fn get_logs(&self, from: u64, to: u64, topic0s: &[B256]) -> Result<Vec<RpcLog>, IndexerError> {
        let topics: Vec<String> = topic0s.iter().map(|t| format!("{t:#x}")).collect();
        self.call(
            "eth_getLogs",
            json!([{
                "fromBlock": format!("0x{from:x}"),
                "toBlock": format!("0x{to:x}"),
                "topics": [topics],
            }]),
        )
        .await
    }
}
