//! Progressive widening look-back scan.
//!
//! For the unbounded `[0, latest]` range, querying the full chain history is
//! wasteful and often rejected by public endpoints. Instead the scan tries
//! progressively larger look-back windows ending at the chain head - one
//! day, one week, one month, one year, three years at ~6 blocks per minute -
//! and returns the first window that yields any hits. Only when every
//! look-back comes up empty is the full range queried.

use tracing::{debug, warn};

use crate::error::AgentResult;
use crate::proxy::MessageProxy;
use crate::rpc::{BlockTag, LogEntry};

/// Chains targeted by the agent produce ~6 blocks per minute.
const BLOCKS_PER_MINUTE: u64 = 6;
const BLOCKS_PER_DAY: u64 = BLOCKS_PER_MINUTE * 60 * 24;

/// Look-back window sizes, narrowest first.
const LOOKBACK_STEPS: [u64; 5] = [
    BLOCKS_PER_DAY,
    BLOCKS_PER_DAY * 7,
    BLOCKS_PER_DAY * 30,
    BLOCKS_PER_DAY * 365,
    BLOCKS_PER_DAY * 365 * 3,
];

pub async fn scan(
    proxy: &MessageProxy,
    dst_chain_hash_hex: &str,
    counter: Option<u64>,
    latest: u64,
) -> AgentResult<Vec<LogEntry>> {
    for lookback in LOOKBACK_STEPS {
        let from = latest.saturating_sub(lookback);
        match proxy
            .outgoing_message_logs(
                dst_chain_hash_hex,
                counter,
                BlockTag::Number(from),
                BlockTag::Number(latest),
            )
            .await
        {
            Ok(logs) if !logs.is_empty() => {
                debug!(from, latest, hits = logs.len(), "progressive scan hit");
                return Ok(logs);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(from, latest, error = %e, "progressive scan window failed, widening");
            }
        }
        if from == 0 {
            // The look-back already covered the whole chain.
            return Ok(Vec::new());
        }
    }

    // Every look-back was empty; fall back to the full range.
    proxy
        .outgoing_message_logs(
            dst_chain_hash_hex,
            counter,
            BlockTag::Number(0),
            BlockTag::Number(latest),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What is tested: the look-back ladder is strictly widening
    /// Why: a misordered ladder would skip the cheap narrow windows
    #[test]
    fn lookback_steps_are_widening() {
        for pair in LOOKBACK_STEPS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(LOOKBACK_STEPS[0], 8_640);
    }
}
