//! Call pipeline for one contract call.
//!
//! The pipeline turns "invoke this method with these arguments" into a
//! mined receipt: gas policy, dry run as the sending account, signing via
//! the configured backend, submission (unless the backend auto-sends),
//! receipt await and outcome classification. A revert observed in the dry
//! run aborts before anything is spent.
//!
//! S-chains run a free-gas policy: when the sending account cannot cover
//! the worst-case cost, an external proof-of-work helper computes a gas
//! price the chain accepts for free, and the transaction is re-signed with
//! that price.

use std::time::Duration;

use alloy::primitives::Address;
use tracing::{debug, info};

use crate::config::PowConfig;
use crate::error::{AgentError, AgentResult};
use crate::gas::GasPolicy;
use crate::rpc::{CallRequest, RpcClient, RpcErrorObject, RpcFailure, TxReceipt};
use crate::signer::{AgentSigner, SignOutcome, TxRequest};

/// Upper bound on waiting for a submitted transaction's receipt.
const RECEIPT_WAIT: Duration = Duration::from_secs(300);

/// Per-call options the transfer loop decides.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Wei attached to the call
    pub value: u128,
    /// Skip the dry run (methods that intentionally revert on probe)
    pub ignore_dry_run: bool,
    /// Recommended gas floor for this method
    pub gas_floor: u64,
    /// Destination chain id for replay protection
    pub chain_id: u64,
    /// The destination runs an S-chain free-gas policy
    pub schain_destination: bool,
}

/// Classified outcome of a successful call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub receipt: TxReceipt,
    pub gas_spent: u64,
    pub wei_spent: u128,
}

/// Runs the full pipeline for one contract call.
pub async fn execute_call(
    client: &RpcClient,
    signer: &AgentSigner,
    policy: &GasPolicy,
    to: Address,
    calldata: Vec<u8>,
    opts: &CallOptions,
    pow: Option<&PowConfig>,
) -> AgentResult<CallOutcome> {
    let from = signer.address();
    let from_hex = format!("{from:#x}");
    let to_hex = format!("{to:#x}");
    let data_hex = format!("0x{}", hex::encode(&calldata));

    // Gas policy: price then limit.
    let raw_price = client.get_gas_price().await?;
    let mut gas_price = policy.effective_gas_price(raw_price);

    let estimate_request = CallRequest {
        from: Some(from_hex.clone()),
        to: to_hex.clone(),
        data: data_hex.clone(),
        value: Some(format!("0x{:x}", opts.value)),
        ..Default::default()
    };
    let estimate = client.estimate_gas(&estimate_request).await?;
    let gas_limit = policy.effective_gas_limit(estimate, opts.gas_floor);
    debug!(raw_price, gas_price, estimate, gas_limit, "gas policy applied");

    // Dry run as the sending account with the computed gas fields.
    if !opts.ignore_dry_run {
        let dry_run_request = CallRequest {
            from: Some(from_hex.clone()),
            to: to_hex.clone(),
            data: data_hex.clone(),
            gas: Some(format!("0x{gas_limit:x}")),
            gas_price: Some(format!("0x{gas_price:x}")),
            value: Some(format!("0x{:x}", opts.value)),
        };
        match client.call_once(&dry_run_request).await {
            Ok(_) => {}
            Err(RpcFailure::Node(error)) => {
                return Err(AgentError::DryRun {
                    reason: decode_revert_reason(&error),
                });
            }
            Err(RpcFailure::Transport(e)) => {
                return Err(AgentError::RpcExhausted {
                    op: "dryRun",
                    endpoint: client.url().to_string(),
                    attempts: 1,
                    last_error: e,
                });
            }
        }
    }

    let nonce = client.get_transaction_count(&from_hex, "pending").await?;

    // Balance pre-flight: either the account covers the worst case, or on an
    // S-chain destination the proof-of-work helper buys the submission.
    let balance = client.get_balance(&from_hex).await?;
    let required = gas_price
        .saturating_mul(gas_limit as u128)
        .saturating_add(opts.value);
    if balance < required {
        if opts.schain_destination {
            if let Some(pow) = pow {
                info!(balance, required, "balance short, invoking proof-of-work helper");
                gas_price = compute_pow(pow, from, nonce, gas_limit).await?;
            } else {
                return Err(AgentError::InsufficientFunds { balance, required });
            }
        } else {
            return Err(AgentError::InsufficientFunds { balance, required });
        }
    }

    let tx = TxRequest {
        to,
        data: calldata,
        value: opts.value,
        gas_price,
        gas_limit,
        nonce,
        chain_id: opts.chain_id,
    };

    let tx_hash = match signer.sign(&tx).await? {
        SignOutcome::Raw(raw) => client.send_raw_transaction(&raw).await?,
        SignOutcome::Submitted { tx_hash } => tx_hash,
    };
    info!(tx_hash = %tx_hash, nonce, "transaction submitted");

    let receipt = client.wait_for_receipt(&tx_hash, RECEIPT_WAIT).await?;
    if !receipt.succeeded() {
        return Err(AgentError::ContractCall { tx_hash });
    }

    let gas_spent = receipt.gas_used_u64();
    let effective_price = match receipt.effective_gas_price_u128() {
        0 => gas_price,
        price => price,
    };
    Ok(CallOutcome {
        gas_spent,
        wei_spent: (gas_spent as u128).saturating_mul(effective_price),
        receipt,
    })
}

// ============================================================================
// REVERT REASON DECODING
// ============================================================================

/// Extracts a human-readable revert reason from a node error object.
///
/// Nodes disagree about where revert data lives: some put the
/// `Error(string)` blob directly in `data`, some nest it one level deeper,
/// some only echo a message. The decoder searches for a hex blob first and
/// falls back to the message text.
pub fn decode_revert_reason(error: &RpcErrorObject) -> String {
    if let Some(data) = &error.data {
        if let Some(blob) = find_hex_blob(data) {
            if let Some(reason) = decode_error_string(&blob) {
                return reason;
            }
        }
    }
    error.message.clone()
}

fn find_hex_blob(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if s.starts_with("0x") => Some(s.clone()),
        serde_json::Value::Object(map) => map.values().find_map(find_hex_blob),
        _ => None,
    }
}

/// Decodes an ABI-encoded `Error(string)` blob (selector 0x08c379a0).
fn decode_error_string(blob: &str) -> Option<String> {
    let bytes = hex::decode(blob.strip_prefix("0x")?).ok()?;
    if bytes.len() < 4 + 64 || bytes[..4] != [0x08, 0xc3, 0x79, 0xa0] {
        return None;
    }
    let payload = &bytes[4..];
    // offset word, then length word, then the string bytes
    let len = u64::from_be_bytes(payload[56..64].try_into().ok()?) as usize;
    let text = payload.get(64..64 + len)?;
    Some(String::from_utf8_lossy(text).into_owned())
}

// ============================================================================
// PROOF-OF-WORK SIDECAR
// ============================================================================

/// Invokes the external proof-of-work helper with a bounded execution
/// budget. The helper prints a hex gas price that satisfies the S-chain's
/// free-gas policy for `(address, nonce, gas)`.
async fn compute_pow(
    pow: &PowConfig,
    address: Address,
    nonce: u64,
    gas: u64,
) -> AgentResult<u128> {
    let budget = Duration::from_millis(pow.budget_ms);
    let run = tokio::process::Command::new(&pow.program)
        .arg(format!("{address:#x}"))
        .arg(nonce.to_string())
        .arg(gas.to_string())
        .output();

    let output = tokio::time::timeout(budget, run)
        .await
        .map_err(|_| AgentError::SignerBackend(format!("pow helper exceeded {budget:?}")))?
        .map_err(|e| AgentError::SignerBackend(format!("pow helper failed to start: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::SignerBackend(format!(
            "pow helper exited with {}: {stderr}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.trim();
    crate::rpc::parse_quantity_u128(line).map_err(|e| {
        AgentError::SignerBackend(format!("pow helper printed unusable price '{line}': {e}"))
    })
}
