//! Batch former.
//!
//! Given the source outgoing counter and the destination incoming counter,
//! forms a contiguous batch of up to `max_messages` messages starting at the
//! incoming counter. Each message is located by the reference walk-back
//! window when available, otherwise by the progressive scan over the whole
//! history. Optional security checks - burial depth under the chain head and
//! block age - stop formation early: messages formed before the stop are
//! still submitted, everything after waits for the next pass.

use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::proxy::{
    chain_hash_topic, decode_outgoing_message, Message, MessageProxy, ReferenceLogRecord,
};
use crate::rpc::{BlockTag, LogEntry};
use crate::scanner::{self, reference, ScanOptions};

/// Options of one batch-forming call.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Upper bound on messages per batch
    pub max_messages: u64,
    /// Required burial depth under the chain head (0 = disabled)
    pub block_await_depth: u64,
    /// Required block age in seconds (0 = disabled)
    pub block_age_sec: u64,
    /// Scan strategy knobs
    pub scan: ScanOptions,
}

/// One formed batch. `stop_reason` carries the security check that ended
/// formation early, if any; it is informational, not a failure.
#[derive(Debug)]
pub struct FormedBatch {
    pub start_counter: u64,
    pub messages: Vec<Message>,
    pub stop_reason: Option<AgentError>,
}

/// Forms the next batch for `src -> dst` in `[in_cnt, out_cnt)`.
pub async fn form_batch(
    src: &MessageProxy,
    dst_name: &str,
    in_cnt: u64,
    out_cnt: u64,
    references: Option<&[ReferenceLogRecord]>,
    opts: &BatchOptions,
) -> AgentResult<FormedBatch> {
    let mut batch = FormedBatch {
        start_counter: in_cnt,
        messages: Vec::new(),
        stop_reason: None,
    };
    if in_cnt >= out_cnt {
        return Ok(batch);
    }

    let dst_hash = chain_hash_topic(dst_name);
    let latest = src.client().get_block_number().await?;
    let now = chrono::Utc::now().timestamp() as u64;
    let end = out_cnt.min(in_cnt + opts.max_messages);

    for counter in in_cnt..end {
        let log = match find_message_log(src, &dst_hash, counter, references, opts).await? {
            Some(log) => log,
            None => {
                // The counter interval guarantees the log exists; a miss
                // means the scan window was too narrow or the node lags.
                // Submit what was formed and retry the rest next pass.
                warn!(counter, "outgoing message log not found, stopping batch formation");
                break;
            }
        };

        let Some(message) = decode_outgoing_message(&log) else {
            warn!(counter, "outgoing message log undecodable, stopping batch formation");
            break;
        };

        if opts.block_await_depth > 0 {
            let depth = latest.saturating_sub(message.saved_block_number);
            if depth < opts.block_await_depth {
                batch.stop_reason = Some(AgentError::BlockDepth {
                    counter,
                    depth,
                    required: opts.block_await_depth,
                });
                break;
            }
        }

        if opts.block_age_sec > 0 {
            let timestamp = src
                .client()
                .get_block(message.saved_block_number)
                .await?
                .map(|b| b.timestamp_u64())
                .unwrap_or(0);
            let age = now.saturating_sub(timestamp);
            if age < opts.block_age_sec {
                batch.stop_reason = Some(AgentError::BlockAge {
                    counter,
                    age_sec: age,
                    required_sec: opts.block_age_sec,
                });
                break;
            }
        }

        batch.messages.push(message);
    }

    debug!(
        start = batch.start_counter,
        formed = batch.messages.len(),
        out_cnt,
        "batch formed"
    );
    Ok(batch)
}

/// Locates the `OutgoingMessage` log for `counter`, preferring the exact
/// reference-walk-back block, newest matching event first.
async fn find_message_log(
    src: &MessageProxy,
    dst_hash: &str,
    counter: u64,
    references: Option<&[ReferenceLogRecord]>,
    opts: &BatchOptions,
) -> AgentResult<Option<LogEntry>> {
    let logs = match references.and_then(|r| reference::window_for(r, counter)) {
        Some(block) => {
            src.outgoing_message_logs(
                dst_hash,
                Some(counter),
                BlockTag::Number(block),
                BlockTag::Number(block),
            )
            .await?
        }
        None => {
            scanner::scan_outgoing_messages(src, dst_hash, Some(counter), 0, None, opts.scan)
                .await?
                .logs
        }
    };

    // Newest wins: a superseded log from an unlikely reorg must not be
    // replayed over the canonical one.
    Ok(logs
        .into_iter()
        .max_by_key(|log| (log.block_number_u64(), log.log_index_u64())))
}
