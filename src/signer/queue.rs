//! Transaction-manager queue backend.
//!
//! The queue manager holds the key, orders submissions by a priority score
//! and submits on the agent's behalf. The agent enqueues the transaction
//! fields, then polls for a terminal status - SUCCESS, FAILED or DROPPED -
//! up to a bounded wait. Only this backend is auto-send: the call pipeline
//! never sees a raw transaction, it receives the hash of the transaction
//! the queue submitted and awaits the receipt from the chain itself.

use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::{AgentError, AgentResult};

use super::TxRequest;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct QueueSigner {
    http: reqwest::Client,
    url: String,
    address: Address,
    priority: u32,
    max_wait: Duration,
}

impl QueueSigner {
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create queue HTTP client")?;
        let address: Address = config
            .address
            .parse()
            .context("invalid queue account address")?;
        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            address,
            priority: config.priority,
            max_wait: Duration::from_secs(config.max_wait_sec),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Enqueues `tx` and waits for a terminal status, returning the hash of
    /// the submitted transaction.
    pub async fn enqueue_and_wait(&self, tx: &TxRequest) -> AgentResult<String> {
        let ts = chrono::Utc::now().timestamp() as u64;
        let score = score(self.priority, ts);

        let body = serde_json::json!({
            "score": score.to_string(),
            "priority": self.priority,
            "tx": {
                "to": format!("{:#x}", tx.to),
                "data": format!("0x{}", hex::encode(&tx.data)),
                "value": format!("0x{:x}", tx.value),
                "gasPrice": format!("0x{:x}", tx.gas_price),
                "gas": format!("0x{:x}", tx.gas_limit),
                "nonce": format!("0x{:x}", tx.nonce),
                "chainId": format!("0x{:x}", tx.chain_id),
            },
        });

        let enqueued: EnqueueResponse = self
            .http
            .post(format!("{}/transactions", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::SignerBackend(format!("queue enqueue failed: {e}")))?
            .json()
            .await
            .map_err(|e| AgentError::SignerBackend(format!("unparsable queue response: {e}")))?;

        debug!(id = %enqueued.id, score, "transaction enqueued");

        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            let status: StatusResponse = self
                .http
                .get(format!("{}/transactions/{}", self.url, enqueued.id))
                .send()
                .await
                .map_err(|e| AgentError::SignerBackend(format!("queue poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| {
                    AgentError::SignerBackend(format!("unparsable queue status: {e}"))
                })?;

            match status.status.as_str() {
                "SUCCESS" => {
                    return status.tx_hash.ok_or_else(|| {
                        AgentError::SignerBackend(
                            "queue reported SUCCESS without a transaction hash".to_string(),
                        )
                    });
                }
                "FAILED" | "DROPPED" => {
                    return Err(AgentError::SignerBackend(format!(
                        "queue terminal status {}: {}",
                        status.status,
                        status.error.unwrap_or_default()
                    )));
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::SignerTimeout(self.max_wait));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Ordering score: the priority is prepended to the decimal timestamp, so a
/// higher-priority transaction always outranks any lower-priority one while
/// equal priorities keep submission order.
fn score(priority: u32, ts: u64) -> u128 {
    let digits = ts.checked_ilog10().map(|d| d + 1).unwrap_or(1);
    (priority as u128) * 10u128.pow(digits) + ts as u128
}
