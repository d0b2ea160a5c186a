//! Walk-back by reference log.
//!
//! Newer message proxies emit a `PreviousMessageReference(currentMessage,
//! previousOutgoingMessageBlockId)` alongside every `OutgoingMessage`,
//! forming a reverse linked list from the latest outgoing message to earlier
//! ones. Starting at `getLastOutgoingMessageBlockId(dst)` and following the
//! chain yields one exact block number per message counter, so each
//! `getLogs` during batch formation covers a single block.
//!
//! Older proxies emit no references; the walk then returns `None` and the
//! caller falls back to the progressive/iterative strategies.

use tracing::debug;

use crate::error::AgentResult;
use crate::proxy::{MessageProxy, ReferenceLogRecord};

/// Safety margin on top of the `out_cnt - in_cnt` record bound, covering
/// blocks that carry references for other destinations.
const WALK_SLACK: u64 = 8;

/// Walks the reference chain backwards, collecting records for counters in
/// `[in_cnt, out_cnt)`. Returns `None` when the proxy does not emit
/// references or the chain is broken.
pub async fn walk_back(
    proxy: &MessageProxy,
    dst_name: &str,
    in_cnt: u64,
    out_cnt: u64,
) -> AgentResult<Option<Vec<ReferenceLogRecord>>> {
    if in_cnt >= out_cnt {
        return Ok(Some(Vec::new()));
    }

    let start_block = proxy.last_outgoing_message_block_id(dst_name).await?;
    if start_block == 0 {
        return Ok(None);
    }

    let mut records: Vec<ReferenceLogRecord> = Vec::new();
    let mut block = start_block;
    let max_steps = (out_cnt - in_cnt) + WALK_SLACK;

    for _ in 0..max_steps {
        let refs = proxy.reference_logs_at(block).await?;
        if refs.is_empty() {
            // Chain broken before reaching in_cnt: an older proxy or pruned
            // logs. Let the caller fall back.
            debug!(block, "reference chain ended without records");
            return Ok(None);
        }

        let mut reached_floor = false;
        let mut next_block = block;
        for record in &refs {
            if record.current_message < out_cnt && record.current_message >= in_cnt {
                records.push(*record);
            }
            if record.current_message <= in_cnt {
                reached_floor = true;
            }
            if record.previous_outgoing_message_block_id < next_block {
                next_block = record.previous_outgoing_message_block_id;
            }
        }

        if reached_floor || next_block == 0 || next_block == block {
            break;
        }
        block = next_block;
    }

    if records.is_empty() {
        return Ok(None);
    }
    records.sort_by_key(|r| r.current_message);
    debug!(
        records = records.len(),
        in_cnt, out_cnt, "reference walk-back complete"
    );
    Ok(Some(records))
}

/// Exact block window for `counter` from a walk-back record set.
pub fn window_for(records: &[ReferenceLogRecord], counter: u64) -> Option<u64> {
    records
        .iter()
        .find(|r| r.current_message == counter)
        .map(|r| r.current_block_id)
}
