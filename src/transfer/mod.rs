//! Per-direction transfer loop.
//!
//! One pass moves every pending message of one direction - M2S, S2M or one
//! S2S sibling - from the source proxy's outgoing log to the destination
//! proxy, in bounded batches, each batch carrying one threshold-BLS
//! aggregate. The loop consults an external coordinator before starting,
//! guarantees a single pass in flight per direction, honors a wall-clock
//! budget at every iteration boundary and after signing, and records its
//! outcome in the process-wide error registry.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collector::SignatureCollector;
use crate::config::{NodeConfig, PowConfig};
use crate::error::{AgentError, AgentResult};
use crate::gas::{post_incoming_messages_floor, GasPolicy};
use crate::proxy::{chain_hash_topic, MessageProxy};
use crate::registry::ErrorRegistry;
use crate::scanner::{reference, ScanOptions};
use crate::signer::AgentSigner;
use crate::tx::{execute_call, CallOptions};
use crate::verifier;

pub mod batch;

use batch::{form_batch, BatchOptions};

// ============================================================================
// COORDINATION
// ============================================================================

/// External mutual-exclusion authority for transfer passes. `check_start`
/// grants or denies a pass; every granted pass brackets its work between
/// `notify_start` and `notify_end`.
pub trait Coordinator: Send + Sync {
    fn check_start(&self, direction: &str, index: usize) -> bool;
    fn notify_start(&self, direction: &str, index: usize);
    fn notify_end(&self, direction: &str, index: usize);
}

/// Per-direction loop state, owned by the direction task. The coordinator
/// and fan-out observe it read-only.
#[derive(Debug, Clone, Default)]
pub struct TransferLoopState {
    pub is_in_progress: bool,
    pub was_in_progress: bool,
    pub steps_done: u64,
    pub current_transfer_serial: u64,
}

/// Per-direction runtime options, resolved by the fan-out from the process
/// configuration.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub transactions_per_block: u64,
    pub transfer_steps: Option<u64>,
    pub max_transactions_count: Option<u64>,
    pub block_await_depth: u64,
    pub block_age_sec: u64,
    pub sleep_between_tx_ms: u64,
    pub wait_for_next_block: bool,
    pub sleep_before_fetch_ms: u64,
    /// Wall-clock budget for one pass; `None` is unbounded
    pub time_budget: Option<Duration>,
    pub scan: ScanOptions,
}

// ============================================================================
// TRANSFER DIRECTION
// ============================================================================

/// Everything one direction needs to run passes.
pub struct TransferDirection {
    /// Direction tag: "M2S", "S2M" or "S2S"
    pub direction: &'static str,
    /// Sibling index for S2S, 0 otherwise
    pub index: usize,
    /// Error registry category, e.g. "loop-M2S"
    pub category: String,
    pub src: MessageProxy,
    pub src_name: String,
    pub dst: MessageProxy,
    pub dst_name: String,
    pub dst_address: Address,
    pub dst_chain_id: u64,
    pub dst_is_mainnet: bool,
    /// Source node roster; present only for S2S directions
    pub roster: Option<Vec<NodeConfig>>,
    pub signer: Arc<AgentSigner>,
    pub collector: Arc<SignatureCollector>,
    pub policy: GasPolicy,
    pub options: TransferOptions,
    pub registry: Arc<ErrorRegistry>,
    pub coordinator: Arc<dyn Coordinator>,
    pub pow: Option<PowConfig>,
    pub state: TransferLoopState,
}

impl TransferDirection {
    /// Runs one pass. Returns the number of messages submitted; a denied
    /// start and an exceeded time budget both return without error.
    pub async fn run_pass(&mut self) -> AgentResult<u64> {
        self.state.current_transfer_serial += 1;
        let serial = self.state.current_transfer_serial;

        if self.state.is_in_progress
            || !self.coordinator.check_start(self.direction, self.index)
        {
            debug!(
                direction = self.direction,
                index = self.index,
                serial,
                "pass denied, previous transfer still in progress"
            );
            return Ok(0);
        }

        self.state.is_in_progress = true;
        self.state.was_in_progress = true;
        self.coordinator.notify_start(self.direction, self.index);
        info!(
            direction = self.direction,
            index = self.index,
            serial,
            src = %self.src_name,
            dst = %self.dst_name,
            "transfer pass started"
        );

        let result = self.pass_inner().await;

        self.state.is_in_progress = false;
        self.coordinator.notify_end(self.direction, self.index);

        match &result {
            Ok(submitted) => {
                info!(
                    direction = self.direction,
                    serial,
                    submitted,
                    "transfer pass complete"
                );
                self.registry.record_success(&self.category).await;
            }
            Err(e) => {
                warn!(direction = self.direction, serial, error = %e, "transfer pass failed");
                self.registry
                    .record_failure(&self.category, &e.to_string())
                    .await;
            }
        }
        result
    }

    async fn pass_inner(&mut self) -> AgentResult<u64> {
        let started = Instant::now();
        let budget = self.options.time_budget;
        let time_exceeded = |started: Instant| match budget {
            Some(limit) => started.elapsed() >= limit,
            None => false,
        };

        let out_cnt = self.src.outgoing_messages_counter(&self.dst_name).await?;
        let in_cnt = self.dst.incoming_messages_counter(&self.src_name).await?;
        debug!(out_cnt, in_cnt, "counters read");
        if in_cnt >= out_cnt {
            return Ok(0);
        }

        if self.options.sleep_before_fetch_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.sleep_before_fetch_ms)).await;
        }

        // The walk-back is an optimization; any failure degrades to the
        // progressive scan.
        let references =
            match reference::walk_back(&self.src, &self.dst_name, in_cnt, out_cnt).await {
                Ok(records) => records,
                Err(e) => {
                    debug!(error = %e, "reference walk-back unavailable, falling back");
                    None
                }
            };

        let batch_opts = BatchOptions {
            max_messages: self.options.transactions_per_block,
            block_await_depth: self.options.block_await_depth,
            block_age_sec: self.options.block_age_sec,
            scan: self.options.scan,
        };

        let mut next_counter = in_cnt;
        let mut submitted_total = 0u64;
        let mut steps = 0u64;

        while next_counter < out_cnt {
            if time_exceeded(started) {
                info!(direction = self.direction, "time budget exceeded, exiting cleanly");
                break;
            }
            if let Some(max_steps) = self.options.transfer_steps {
                if steps >= max_steps {
                    break;
                }
            }
            if let Some(max_messages) = self.options.max_transactions_count {
                if submitted_total >= max_messages {
                    break;
                }
            }

            let batch = form_batch(
                &self.src,
                &self.dst_name,
                next_counter,
                out_cnt,
                references.as_deref(),
                &batch_opts,
            )
            .await?;

            let stopped_early = batch.stop_reason.is_some();
            if let Some(reason) = &batch.stop_reason {
                info!(direction = self.direction, %reason, "security check deferred remaining messages");
            }
            if batch.messages.is_empty() {
                break;
            }

            if let Some(roster) = &self.roster {
                verifier::verify_batch(
                    &batch.messages,
                    batch.start_counter,
                    roster,
                    self.src.address(),
                    &chain_hash_topic(&self.dst_name),
                )
                .await?;
            }

            let signature = self
                .collector
                .sign(&batch.messages, batch.start_counter, &self.src_name)
                .await?;

            // The budget is consulted again after signing; an in-flight
            // submission is never cancelled, so this is the last exit
            // before committing to one.
            if time_exceeded(started) {
                info!(direction = self.direction, "time budget exceeded after signing, exiting cleanly");
                break;
            }

            let calldata = MessageProxy::post_incoming_messages_calldata(
                &self.src_name,
                batch.start_counter,
                &batch.messages,
                &signature,
            );
            let call_opts = CallOptions {
                value: 0,
                ignore_dry_run: false,
                gas_floor: post_incoming_messages_floor(batch.messages.len()),
                chain_id: self.dst_chain_id,
                schain_destination: !self.dst_is_mainnet,
            };
            let outcome = execute_call(
                self.dst.client(),
                &self.signer,
                &self.policy,
                self.dst_address,
                calldata,
                &call_opts,
                self.pow.as_ref(),
            )
            .await?;

            info!(
                direction = self.direction,
                start = batch.start_counter,
                messages = batch.messages.len(),
                gas = outcome.gas_spent,
                wei = outcome.wei_spent,
                tx = %outcome.receipt.transaction_hash,
                "batch submitted"
            );

            if self.dst_is_mainnet {
                let errors = self
                    .dst
                    .post_message_errors(
                        outcome.receipt.block_number_u64(),
                        &outcome.receipt.transaction_hash,
                    )
                    .await?;
                if !errors.is_empty() {
                    return Err(AgentError::PostMessage {
                        details: errors.join("; "),
                    });
                }
            }

            submitted_total += batch.messages.len() as u64;
            next_counter = batch.start_counter + batch.messages.len() as u64;
            steps += 1;
            self.state.steps_done += 1;

            if stopped_early {
                break;
            }

            if !self.dst_is_mainnet && next_counter < out_cnt {
                if self.options.sleep_between_tx_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.options.sleep_between_tx_ms))
                        .await;
                }
                if self.options.wait_for_next_block {
                    let head = outcome.receipt.block_number_u64();
                    self.dst.client().wait_for_next_block(head).await?;
                }
            }
        }

        Ok(submitted_total)
    }
}
