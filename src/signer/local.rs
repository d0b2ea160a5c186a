//! Local private key backend.
//!
//! Signs the legacy transaction envelope with a secp256k1 key held in
//! memory. The key is read from an environment variable at startup and
//! never logged.

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use anyhow::{Context, Result};

use crate::error::{AgentError, AgentResult};

use super::{build_legacy_tx, TxRequest};

pub struct LocalKeySigner {
    key: PrivateKeySigner,
}

impl LocalKeySigner {
    /// Parses a hex private key, with or without 0x prefix.
    pub fn new(hex_key: &str) -> Result<Self> {
        let key: PrivateKeySigner = hex_key
            .trim()
            .parse()
            .context("invalid secp256k1 private key")?;
        Ok(Self { key })
    }

    pub fn address(&self) -> Address {
        self.key.address()
    }

    /// Produces the raw RLP-encoded signed transaction.
    pub fn sign(&self, tx: &TxRequest) -> AgentResult<Vec<u8>> {
        let legacy = build_legacy_tx(tx);
        let signature = self
            .key
            .sign_hash_sync(&legacy.signature_hash())
            .map_err(|e| AgentError::SignerBackend(format!("local signing failed: {e}")))?;
        let signed = legacy.into_signed(signature);
        Ok(TxEnvelope::Legacy(signed).encoded_2718())
    }
}
