//! Error kinds for the transfer engine.
//!
//! Errors are organized in propagation tiers. Transient RPC failures are
//! absorbed by the retrying RPC wrapper and only surface here after the
//! attempt budget is exhausted. Security and signing failures abort the
//! current batch; contract failures abort the current pass. None of these
//! terminate the process - only startup misconfiguration does, and that is
//! reported through `anyhow` out of `main`.

use std::time::Duration;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The endpoint did not answer a TCP health probe.
    #[error("endpoint {endpoint} is offline")]
    EndpointOffline { endpoint: String },

    /// An RPC operation failed after exhausting its attempt budget.
    #[error("rpc {op} against {endpoint} failed after {attempts} attempts: {last_error}")]
    RpcExhausted {
        op: &'static str,
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    /// A formed message is not yet buried deep enough under the chain head.
    #[error("message {counter} is {depth} blocks deep, {required} required")]
    BlockDepth {
        counter: u64,
        depth: u64,
        required: u64,
    },

    /// A formed message's block is not yet old enough.
    #[error("message {counter} block age {age_sec}s is below required {required_sec}s")]
    BlockAge {
        counter: u64,
        age_sec: u64,
        required_sec: u64,
    },

    /// Too many source-chain nodes dissent on an outgoing message.
    #[error("s2s verification failed: {fails} of {nodes} nodes dissent, quorum is {quorum}")]
    S2SQuorum {
        fails: usize,
        nodes: usize,
        quorum: usize,
    },

    /// A signer backend reported a failure.
    #[error("signer backend: {0}")]
    SignerBackend(String),

    /// A signer backend did not reach a terminal state in time.
    #[error("signer timed out after {0:?}")]
    SignerTimeout(Duration),

    /// BLS signature collection failed.
    #[error("signature collection: {0}")]
    Collector(String),

    /// The pre-submission static call reverted.
    #[error("dry run reverted: {reason}")]
    DryRun { reason: String },

    /// The submitted transaction was mined with a failure status.
    #[error("contract call reverted in transaction {tx_hash}")]
    ContractCall { tx_hash: String },

    /// The sender account cannot cover the worst-case transaction cost.
    #[error("insufficient funds: balance {balance} wei, {required} wei required")]
    InsufficientFunds { balance: u128, required: u128 },

    /// The destination proxy accepted the batch but logged a per-message error.
    #[error("destination proxy reported PostMessageError: {details}")]
    PostMessage { details: String },
}

pub type AgentResult<T> = Result<T, AgentError>;
