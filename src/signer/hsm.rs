//! Remote HSM backend.
//!
//! The HSM holds the key and signs 32-byte hashes on request over a
//! JSON-RPC endpoint, optionally authenticated with a client TLS
//! certificate. The agent computes the replay-protected signature hash of
//! the legacy envelope, asks the HSM for `(r, s, v)` over it, assembles the
//! signature and RLP-encodes the signed transaction itself.

use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, PrimitiveSignature, U256};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::HsmConfig;
use crate::error::{AgentError, AgentResult};

use super::{build_legacy_tx, TxRequest};

#[derive(Debug, Deserialize)]
struct HsmRpcResponse {
    result: Option<HsmSignResult>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HsmSignResult {
    signature_r: String,
    signature_s: String,
    signature_v: u64,
}

pub struct HsmSigner {
    http: reqwest::Client,
    url: String,
    key_name: String,
    address: Address,
}

impl HsmSigner {
    pub fn new(config: &HsmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .no_proxy();

        if let (Some(cert_path), Some(key_path)) =
            (&config.tls_cert_path, &config.tls_key_path)
        {
            let mut pem = std::fs::read(cert_path)
                .with_context(|| format!("Failed to read TLS certificate {cert_path}"))?;
            pem.extend(
                std::fs::read(key_path)
                    .with_context(|| format!("Failed to read TLS key {key_path}"))?,
            );
            let identity = reqwest::Identity::from_pem(&pem)
                .context("Failed to parse TLS client identity")?;
            builder = builder.identity(identity);
        }

        let address: Address = config
            .address
            .parse()
            .context("invalid HSM account address")?;

        Ok(Self {
            http: builder.build().context("Failed to create HSM HTTP client")?,
            url: config.url.clone(),
            key_name: config.key_name.clone(),
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs `tx` by requesting an ECDSA signature over its signature hash.
    pub async fn sign(&self, tx: &TxRequest) -> AgentResult<Vec<u8>> {
        let legacy = build_legacy_tx(tx);
        let hash = legacy.signature_hash();

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "ecdsaSignMessageHash",
            "params": {
                "base": 16,
                "keyName": self.key_name,
                "messageHash": format!("{hash:#x}"),
            },
            "id": 1,
        });

        let response: HsmRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::SignerBackend(format!("HSM request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AgentError::SignerBackend(format!("unparsable HSM response: {e}")))?;

        if let Some(error) = response.error {
            return Err(AgentError::SignerBackend(format!("HSM error: {error}")));
        }
        let result = response
            .result
            .ok_or_else(|| AgentError::SignerBackend("empty HSM response".to_string()))?;

        let r = parse_scalar(&result.signature_r)?;
        let s = parse_scalar(&result.signature_s)?;
        // The HSM reports the recovery id either raw (0/1) or in the
        // pre-EIP-155 form (27/28); the RLP encoder applies the chain-id
        // transformation from the envelope.
        let v = if result.signature_v >= 27 {
            result.signature_v - 27
        } else {
            result.signature_v
        };
        if v > 1 {
            return Err(AgentError::SignerBackend(format!(
                "HSM returned unusable recovery id {}",
                result.signature_v
            )));
        }
        let signature = PrimitiveSignature::new(r, s, v == 1);

        let signed = legacy.into_signed(signature);
        Ok(TxEnvelope::Legacy(signed).encoded_2718())
    }
}

fn parse_scalar(hex_str: &str) -> AgentResult<U256> {
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    U256::from_str_radix(clean, 16)
        .map_err(|e| AgentError::SignerBackend(format!("bad HSM scalar '{hex_str}': {e}")))
}
