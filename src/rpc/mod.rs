//! Resilient JSON-RPC client.
//!
//! Every call to a chain endpoint funnels through a uniform retrying
//! wrapper: try once, on failure probe the endpoint with a short TCP health
//! check, and either fail fast when the endpoint is offline or retry up to
//! the attempt budget with a growing pause. Only an exhausted budget
//! surfaces an error to the caller.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

/// TCP connect budget for the offline probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cadence of `wait_for_next_block` and receipt polling.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Base pause between attempts; grows linearly, capped at 3 s.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(300);

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: u64,
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<T>,
    error: Option<RpcErrorObject>,
    #[allow(dead_code)]
    id: Option<u64>,
}

/// Error object returned by the node. `data` carries revert information for
/// `eth_call` and is preserved for the dry-run reason decoder.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One failed request, before the retry policy is applied.
#[derive(Debug)]
pub enum RpcFailure {
    /// The HTTP round trip or response decoding failed.
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    Node(RpcErrorObject),
}

impl RpcFailure {
    fn describe(&self) -> String {
        match self {
            RpcFailure::Transport(e) => e.clone(),
            RpcFailure::Node(e) => format!("{} (code: {})", e.message, e.code),
        }
    }
}

/// Event log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEntry {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

impl LogEntry {
    pub fn block_number_u64(&self) -> u64 {
        parse_quantity(&self.block_number).unwrap_or(0)
    }

    pub fn log_index_u64(&self) -> u64 {
        parse_quantity(&self.log_index).unwrap_or(0)
    }
}

/// Transaction receipt subset the pipeline needs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TxReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    /// "0x1" success, "0x0" failure
    pub status: Option<String>,
    #[serde(rename = "gasUsed")]
    pub gas_used: String,
    #[serde(rename = "effectiveGasPrice")]
    pub effective_gas_price: Option<String>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }

    pub fn block_number_u64(&self) -> u64 {
        parse_quantity(&self.block_number).unwrap_or(0)
    }

    pub fn gas_used_u64(&self) -> u64 {
        parse_quantity(&self.gas_used).unwrap_or(0)
    }

    pub fn effective_gas_price_u128(&self) -> u128 {
        self.effective_gas_price
            .as_deref()
            .and_then(|p| parse_quantity_u128(p).ok())
            .unwrap_or(0)
    }
}

/// Block header subset: number and timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub number: String,
    pub timestamp: String,
}

impl BlockHeader {
    pub fn number_u64(&self) -> u64 {
        parse_quantity(&self.number).unwrap_or(0)
    }

    pub fn timestamp_u64(&self) -> u64 {
        parse_quantity(&self.timestamp).unwrap_or(0)
    }
}

/// Arguments of `eth_call` / `eth_estimateGas`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(rename = "gasPrice", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Block reference used in filters and call tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    pub fn to_value(self) -> Value {
        match self {
            BlockTag::Number(n) => Value::String(format!("0x{n:x}")),
            BlockTag::Latest => Value::String("latest".to_string()),
        }
    }
}

/// `eth_getLogs` filter. `topics` entries of `None` are wildcards.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
    pub from_block: BlockTag,
    pub to_block: BlockTag,
}

impl LogFilter {
    fn to_value(&self) -> Value {
        let topics: Vec<Value> = self
            .topics
            .iter()
            .map(|t| match t {
                Some(topic) => Value::String(topic.clone()),
                None => Value::Null,
            })
            .collect();
        serde_json::json!({
            "address": self.address,
            "topics": topics,
            "fromBlock": self.from_block.to_value(),
            "toBlock": self.to_block.to_value(),
        })
    }
}

/// Retry policy for one wrapped operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Attempts before the operation is considered exhausted (>= 1)
    pub cnt_attempts: u32,
    /// Exhaustion yields `Ok(None)` instead of an error
    pub return_on_fail: bool,
    /// An offline probe failure aborts immediately with `EndpointOffline`
    pub throw_if_server_offline: bool,
}

impl RetryOptions {
    pub fn attempts(cnt_attempts: u32) -> Self {
        Self {
            cnt_attempts: cnt_attempts.max(1),
            return_on_fail: false,
            throw_if_server_offline: true,
        }
    }

    pub fn soft(cnt_attempts: u32) -> Self {
        Self {
            cnt_attempts: cnt_attempts.max(1),
            return_on_fail: true,
            throw_if_server_offline: false,
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for one chain endpoint. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    attempts: u32,
}

impl RpcClient {
    /// Creates a client for `url` with the default per-operation attempt
    /// budget `attempts`.
    pub fn new(url: &str, attempts: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            http,
            url: url.to_string(),
            attempts: attempts.max(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn default_options(&self) -> RetryOptions {
        RetryOptions::attempts(self.attempts)
    }

    /// One JSON-RPC round trip without retry.
    async fn request_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
    ) -> Result<Option<T>, RpcFailure> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("request to {} failed: {e}", self.url)))?;

        let parsed: JsonRpcResponse<T> = response.json().await.map_err(|e| {
            RpcFailure::Transport(format!("unparsable response from {}: {e}", self.url))
        })?;

        if let Some(error) = parsed.error {
            return Err(RpcFailure::Node(error));
        }
        Ok(parsed.result)
    }

    /// Retrying wrapper. `op` identifies the operation in errors and logs.
    ///
    /// A transport failure triggers the offline probe; if the endpoint does
    /// not accept a TCP connection and `throw_if_server_offline` is set, the
    /// wrapper aborts with `EndpointOffline` without consuming the remaining
    /// attempts. The result is keyed exclusively on the accumulated return
    /// value of the last attempt.
    pub async fn retrying<T: DeserializeOwned>(
        &self,
        op: &'static str,
        method: &str,
        params: Vec<Value>,
        opts: RetryOptions,
    ) -> AgentResult<Option<T>> {
        let mut last_error = String::new();
        for attempt in 1..=opts.cnt_attempts {
            match self.request_once::<T>(method, &params).await {
                Ok(result) => return Ok(result),
                Err(failure) => {
                    last_error = failure.describe();
                    debug!(op, attempt, error = %last_error, "rpc attempt failed");
                    if let RpcFailure::Transport(_) = failure {
                        if !self.probe_online().await && opts.throw_if_server_offline {
                            return Err(AgentError::EndpointOffline {
                                endpoint: self.url.clone(),
                            });
                        }
                    }
                }
            }
            if attempt < opts.cnt_attempts {
                let pause = RETRY_BACKOFF_BASE
                    .saturating_mul(attempt)
                    .min(Duration::from_secs(3));
                tokio::time::sleep(pause).await;
            }
        }

        if opts.return_on_fail {
            warn!(op, endpoint = %self.url, error = %last_error, "rpc exhausted, returning empty");
            return Ok(None);
        }
        Err(AgentError::RpcExhausted {
            op,
            endpoint: self.url.clone(),
            attempts: opts.cnt_attempts,
            last_error,
        })
    }

    /// Probes the endpoint with a short TCP connect.
    pub async fn probe_online(&self) -> bool {
        let Ok(url) = reqwest::Url::parse(&self.url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let Some(port) = url.port_or_known_default() else {
            return false;
        };
        matches!(
            tokio::time::timeout(
                HEALTH_PROBE_TIMEOUT,
                tokio::net::TcpStream::connect((host, port)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    // ------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------

    /// Current block number.
    pub async fn get_block_number(&self) -> AgentResult<u64> {
        let hex: Option<String> = self
            .retrying(
                "getBlockNumber",
                "eth_blockNumber",
                vec![],
                self.default_options(),
            )
            .await?;
        required_quantity("getBlockNumber", &self.url, hex)
    }

    /// Header of the block at `number`; `None` for an unknown block.
    pub async fn get_block(&self, number: u64) -> AgentResult<Option<BlockHeader>> {
        self.retrying(
            "getBlock",
            "eth_getBlockByNumber",
            vec![BlockTag::Number(number).to_value(), Value::Bool(false)],
            self.default_options(),
        )
        .await
    }

    /// Nonce of `address` at `tag` ("latest" or "pending").
    pub async fn get_transaction_count(&self, address: &str, tag: &str) -> AgentResult<u64> {
        let hex: Option<String> = self
            .retrying(
                "getTransactionCount",
                "eth_getTransactionCount",
                vec![Value::String(address.to_string()), Value::String(tag.to_string())],
                self.default_options(),
            )
            .await?;
        required_quantity("getTransactionCount", &self.url, hex)
    }

    /// Receipt of `hash`; `None` while the transaction is pending.
    pub async fn get_transaction_receipt(&self, hash: &str) -> AgentResult<Option<TxReceipt>> {
        self.retrying(
            "getTransactionReceipt",
            "eth_getTransactionReceipt",
            vec![Value::String(hash.to_string())],
            self.default_options(),
        )
        .await
    }

    /// Balance of `address` in wei.
    pub async fn get_balance(&self, address: &str) -> AgentResult<u128> {
        let hex: Option<String> = self
            .retrying(
                "getBalance",
                "eth_getBalance",
                vec![
                    Value::String(address.to_string()),
                    Value::String("latest".to_string()),
                ],
                self.default_options(),
            )
            .await?;
        required_quantity_u128("getBalance", &self.url, hex)
    }

    /// Node-reported gas price in wei.
    pub async fn get_gas_price(&self) -> AgentResult<u128> {
        let hex: Option<String> = self
            .retrying(
                "getGasPrice",
                "eth_gasPrice",
                vec![],
                self.default_options(),
            )
            .await?;
        required_quantity_u128("getGasPrice", &self.url, hex)
    }

    /// Retried `eth_call` for view reads. Reverts are not distinguished from
    /// other node errors here; use [`RpcClient::call_once`] for the dry run.
    pub async fn call(&self, request: &CallRequest, tag: BlockTag) -> AgentResult<String> {
        let params = vec![
            serde_json::to_value(request)
                .map_err(|e| AgentError::RpcExhausted {
                    op: "call",
                    endpoint: self.url.clone(),
                    attempts: 0,
                    last_error: e.to_string(),
                })?,
            tag.to_value(),
        ];
        let result: Option<String> = self
            .retrying("call", "eth_call", params, self.default_options())
            .await?;
        result.ok_or_else(|| AgentError::RpcExhausted {
            op: "call",
            endpoint: self.url.clone(),
            attempts: self.attempts,
            last_error: "null result".to_string(),
        })
    }

    /// Single-attempt `eth_call` preserving the node's error object, so a
    /// revert reason can be decoded from `data`.
    pub async fn call_once(&self, request: &CallRequest) -> Result<Option<String>, RpcFailure> {
        let params = vec![
            serde_json::to_value(request).map_err(|e| RpcFailure::Transport(e.to_string()))?,
            BlockTag::Latest.to_value(),
        ];
        self.request_once("eth_call", &params).await
    }

    /// Gas estimate for `request`; `0` when the node cannot produce one.
    /// The caller substitutes its recommended floor for a zero estimate.
    pub async fn estimate_gas(&self, request: &CallRequest) -> AgentResult<u64> {
        let params = vec![serde_json::to_value(request).map_err(|e| {
            AgentError::RpcExhausted {
                op: "estimateGas",
                endpoint: self.url.clone(),
                attempts: 0,
                last_error: e.to_string(),
            }
        })?];
        let hex: Option<String> = self
            .retrying(
                "estimateGas",
                "eth_estimateGas",
                params,
                RetryOptions::soft(self.attempts),
            )
            .await?;
        Ok(hex.and_then(|h| parse_quantity(&h).ok()).unwrap_or(0))
    }

    /// Event logs matching `filter`.
    pub async fn get_logs(&self, filter: &LogFilter) -> AgentResult<Vec<LogEntry>> {
        let result: Option<Vec<LogEntry>> = self
            .retrying(
                "getLogs",
                "eth_getLogs",
                vec![filter.to_value()],
                self.default_options(),
            )
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// Submits a signed raw transaction, returning its hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> AgentResult<String> {
        let hex: Option<String> = self
            .retrying(
                "sendRawTransaction",
                "eth_sendRawTransaction",
                vec![Value::String(format!("0x{}", hex::encode(raw)))],
                // Re-broadcasting a signed transaction is idempotent: the
                // same hash either enters the pool or is already known.
                self.default_options(),
            )
            .await?;
        hex.ok_or_else(|| AgentError::RpcExhausted {
            op: "sendRawTransaction",
            endpoint: self.url.clone(),
            attempts: self.attempts,
            last_error: "null result".to_string(),
        })
    }

    /// Polls at ~1 s cadence until the chain head is strictly greater than
    /// `snapshot`, returning the new head.
    pub async fn wait_for_next_block(&self, snapshot: u64) -> AgentResult<u64> {
        loop {
            let head = self.get_block_number().await?;
            if head > snapshot {
                return Ok(head);
            }
            tokio::time::sleep(BLOCK_POLL_INTERVAL).await;
        }
    }

    /// Polls for the receipt of `hash` until `max_wait` elapses.
    pub async fn wait_for_receipt(&self, hash: &str, max_wait: Duration) -> AgentResult<TxReceipt> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Some(receipt) = self.get_transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::RpcExhausted {
                    op: "getTransactionReceipt",
                    endpoint: self.url.clone(),
                    attempts,
                    last_error: format!("no receipt for {hash} within {max_wait:?}"),
                });
            }
            tokio::time::sleep(BLOCK_POLL_INTERVAL).await;
        }
    }
}

// ============================================================================
// QUANTITY PARSING
// ============================================================================

/// Parses a 0x-prefixed hex quantity into u64.
pub fn parse_quantity(hex: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(hex.strip_prefix("0x").unwrap_or(hex), 16)
}

/// Parses a 0x-prefixed hex quantity into u128.
pub fn parse_quantity_u128(hex: &str) -> Result<u128, std::num::ParseIntError> {
    u128::from_str_radix(hex.strip_prefix("0x").unwrap_or(hex), 16)
}

fn required_quantity(op: &'static str, endpoint: &str, hex: Option<String>) -> AgentResult<u64> {
    let hex = hex.ok_or_else(|| AgentError::RpcExhausted {
        op,
        endpoint: endpoint.to_string(),
        attempts: 1,
        last_error: "null result".to_string(),
    })?;
    parse_quantity(&hex).map_err(|e| AgentError::RpcExhausted {
        op,
        endpoint: endpoint.to_string(),
        attempts: 1,
        last_error: format!("unparsable quantity '{hex}': {e}"),
    })
}

fn required_quantity_u128(
    op: &'static str,
    endpoint: &str,
    hex: Option<String>,
) -> AgentResult<u128> {
    let hex = hex.ok_or_else(|| AgentError::RpcExhausted {
        op,
        endpoint: endpoint.to_string(),
        attempts: 1,
        last_error: "null result".to_string(),
    })?;
    parse_quantity_u128(&hex).map_err(|e| AgentError::RpcExhausted {
        op,
        endpoint: endpoint.to_string(),
        attempts: 1,
        last_error: format!("unparsable quantity '{hex}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What is tested: hex quantities with and without 0x prefix parse
    /// Why: nodes are inconsistent about the prefix in some fields
    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("10").unwrap(), 16);
        assert_eq!(parse_quantity_u128("0xde0b6b3a7640000").unwrap(), 10u128.pow(18));
        assert!(parse_quantity("0xzz").is_err());
    }

    /// What is tested: log filters serialize wildcards as JSON null
    /// Why: the node treats null topics as "match any", an absent topic
    /// would narrow the filter instead
    #[test]
    fn filter_serialization() {
        let filter = LogFilter {
            address: "0xd2aaa00100000000000000000000000000000000".to_string(),
            topics: vec![Some("0xabc".to_string()), None, Some("0xdef".to_string())],
            from_block: BlockTag::Number(16),
            to_block: BlockTag::Latest,
        };
        let value = filter.to_value();
        assert_eq!(value["fromBlock"], "0x10");
        assert_eq!(value["toBlock"], "latest");
        assert_eq!(value["topics"][0], "0xabc");
        assert!(value["topics"][1].is_null());
    }
}
