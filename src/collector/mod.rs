//! Threshold-BLS signature collection.
//!
//! Submitting a batch requires a threshold-BLS aggregate over the batch
//! hash, verifiable by the destination proxy against the source chain's
//! common public key. Collection itself happens in an external signing
//! service; the agent posts the batch hash preimage and receives the
//! aggregate in the destination proxy's wire shape.
//!
//! A stub collector returning the all-zero signature exists for test
//! deployments whose proxies skip verification. Configuration validation
//! refuses the stub outside of test mode.

use std::time::Duration;

use alloy::primitives::U256;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::error::{AgentError, AgentResult};
use crate::proxy::{batch_hash, BlsSignature, Message};

#[derive(Debug, Deserialize)]
struct CollectorResponse {
    #[serde(rename = "blsSignature")]
    bls_signature: Option<[String; 2]>,
    #[serde(rename = "hashA")]
    hash_a: Option<String>,
    #[serde(rename = "hashB")]
    hash_b: Option<String>,
    #[serde(default)]
    counter: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

/// Signature collection backend.
pub enum SignatureCollector {
    Http(HttpCollector),
    Stub,
}

impl SignatureCollector {
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        match &config.url {
            Some(url) => Ok(SignatureCollector::Http(HttpCollector::new(
                url,
                Duration::from_millis(config.timeout_ms),
            )?)),
            None => Ok(SignatureCollector::Stub),
        }
    }

    /// Obtains the aggregate over `messages` starting at `start_counter`
    /// from the source chain `src_chain`'s validator quorum.
    pub async fn sign(
        &self,
        messages: &[Message],
        start_counter: u64,
        src_chain: &str,
    ) -> AgentResult<BlsSignature> {
        match self {
            SignatureCollector::Http(collector) => {
                collector.sign(messages, start_counter, src_chain).await
            }
            SignatureCollector::Stub => {
                warn!(
                    src_chain,
                    start_counter,
                    "using all-zero stub signature; destination must skip verification"
                );
                Ok(BlsSignature::zero())
            }
        }
    }
}

/// Collector talking to the external signing service.
pub struct HttpCollector {
    http: reqwest::Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("Failed to create collector HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    async fn sign(
        &self,
        messages: &[Message],
        start_counter: u64,
        src_chain: &str,
    ) -> AgentResult<BlsSignature> {
        let hash = batch_hash(messages);
        let body = serde_json::json!({
            "messageHash": format!("0x{}", hex::encode(hash)),
            "startingCounter": start_counter,
            "srcChainName": src_chain,
            "messageCount": messages.len(),
        });

        let response: CollectorResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Collector(format!("signing service timed out: {e}"))
                } else {
                    AgentError::Collector(format!("signing service request failed: {e}"))
                }
            })?
            .json()
            .await
            .map_err(|e| AgentError::Collector(format!("unparsable signing response: {e}")))?;

        if let Some(error) = response.error_message {
            return Err(AgentError::Collector(format!("signing service: {error}")));
        }

        let bls = response
            .bls_signature
            .ok_or_else(|| AgentError::Collector("response carries no signature".to_string()))?;
        let signature = BlsSignature {
            bls_signature: [parse_uint(&bls[0])?, parse_uint(&bls[1])?],
            hash_a: parse_uint(response.hash_a.as_deref().unwrap_or("0"))?,
            hash_b: parse_uint(response.hash_b.as_deref().unwrap_or("0"))?,
            counter: response.counter.unwrap_or_else(|| "0".to_string()),
        };
        info!(src_chain, start_counter, "BLS aggregate collected");
        Ok(signature)
    }
}

fn parse_uint(text: &str) -> AgentResult<U256> {
    let (radix, digits) = match text.strip_prefix("0x") {
        Some(hex_digits) => (16, hex_digits),
        None => (10, text),
    };
    U256::from_str_radix(digits, radix)
        .map_err(|e| AgentError::Collector(format!("bad uint '{text}' in response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What is tested: decimal and hex uints in collector responses parse
    /// Why: signing services disagree about their number formatting
    #[test]
    fn uint_parsing() {
        assert_eq!(parse_uint("42").unwrap(), U256::from(42));
        assert_eq!(parse_uint("0x2a").unwrap(), U256::from(42));
        assert!(parse_uint("forty-two").is_err());
    }

    /// What is tested: the stub collector yields the all-zero signature
    /// Why: test deployments go through the same submission path
    #[tokio::test]
    async fn stub_returns_zero() {
        let collector = SignatureCollector::Stub;
        let signature = collector.sign(&[], 0, "Bob").await.unwrap();
        assert!(signature.is_zero());
    }
}
