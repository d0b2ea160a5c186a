//! Transaction signing backends.
//!
//! The call pipeline consumes a uniform signer capability with three
//! backends: a local private key, a remote HSM signing transaction hashes
//! over a TLS-authenticated RPC, and a transaction-manager queue that signs
//! and submits on the agent's behalf. Dispatch is by capability: the
//! pipeline asks `is_auto_send()` to learn whether it must submit the raw
//! transaction itself.

use alloy::consensus::TxLegacy;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use anyhow::{Context, Result};

use crate::config::SignerConfig;
use crate::error::AgentResult;

pub mod hsm;
pub mod local;
pub mod queue;

pub use hsm::HsmSigner;
pub use local::LocalKeySigner;
pub use queue::QueueSigner;

/// One transaction to be signed, in agent-domain units.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub nonce: u64,
    pub chain_id: u64,
}

/// What a backend produced: a raw transaction the pipeline must submit, or
/// the hash of a transaction the backend already submitted.
#[derive(Debug, Clone)]
pub enum SignOutcome {
    Raw(Vec<u8>),
    Submitted { tx_hash: String },
}

/// Polymorphic signer over the three backends.
pub enum AgentSigner {
    Local(LocalKeySigner),
    Hsm(HsmSigner),
    Queue(QueueSigner),
}

impl AgentSigner {
    /// Builds the configured backend. Misconfiguration here is a startup
    /// error and terminates the process.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        if let Some(local) = &config.local {
            let key = local.get_private_key()?;
            return Ok(AgentSigner::Local(
                LocalKeySigner::new(&key).context("Failed to load local signing key")?,
            ));
        }
        if let Some(hsm) = &config.hsm {
            return Ok(AgentSigner::Hsm(
                HsmSigner::new(hsm).context("Failed to initialize HSM signer")?,
            ));
        }
        if let Some(queue) = &config.queue {
            return Ok(AgentSigner::Queue(
                QueueSigner::new(queue).context("Failed to initialize queue signer")?,
            ));
        }
        anyhow::bail!("no signer backend configured")
    }

    /// The account the backend signs for, as a 0x-prefixed hex address.
    pub fn address(&self) -> Address {
        match self {
            AgentSigner::Local(s) => s.address(),
            AgentSigner::Hsm(s) => s.address(),
            AgentSigner::Queue(s) => s.address(),
        }
    }

    /// Whether the backend submits transactions itself. Only the queue
    /// backend does.
    pub fn is_auto_send(&self) -> bool {
        matches!(self, AgentSigner::Queue(_))
    }

    /// Signs (and for auto-send backends, submits) `tx`.
    pub async fn sign(&self, tx: &TxRequest) -> AgentResult<SignOutcome> {
        match self {
            AgentSigner::Local(s) => s.sign(tx).map(SignOutcome::Raw),
            AgentSigner::Hsm(s) => s.sign(tx).await.map(SignOutcome::Raw),
            AgentSigner::Queue(s) => {
                let tx_hash = s.enqueue_and_wait(tx).await?;
                Ok(SignOutcome::Submitted { tx_hash })
            }
        }
    }
}

/// Legacy transaction envelope for `tx`. The chain id rides along so the
/// signature hash follows the replay-protected scheme.
pub(crate) fn build_legacy_tx(tx: &TxRequest) -> TxLegacy {
    TxLegacy {
        chain_id: Some(tx.chain_id),
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: TxKind::Call(tx.to),
        value: U256::from(tx.value),
        input: Bytes::from(tx.data.clone()),
    }
}
