//! Iterative windowed log scan.
//!
//! Splits a bounded block range into windows of a fixed size and queries
//! each window in ascending order. A failing window contributes an empty
//! result and the scan moves on; the degraded coverage is acceptable
//! because the batch former re-scans on the next pass. When the window size
//! is zero or the range would need more windows than the configured cap,
//! the scan collapses into a single full-range query.

use tracing::warn;

use crate::error::AgentResult;
use crate::proxy::MessageProxy;
use crate::rpc::{BlockTag, LogEntry};

pub async fn scan(
    proxy: &MessageProxy,
    dst_chain_hash_hex: &str,
    counter: Option<u64>,
    from: u64,
    to: u64,
    window: u64,
    max_windows: u64,
) -> AgentResult<Vec<LogEntry>> {
    if to < from {
        return Ok(Vec::new());
    }

    let span = to - from + 1;
    let needed_windows = if window == 0 { u64::MAX } else { span.div_ceil(window) };
    if window == 0 || needed_windows > max_windows {
        return proxy
            .outgoing_message_logs(
                dst_chain_hash_hex,
                counter,
                BlockTag::Number(from),
                BlockTag::Number(to),
            )
            .await;
    }

    let mut logs = Vec::new();
    let mut start = from;
    while start <= to {
        let end = to.min(start + window - 1);
        match proxy
            .outgoing_message_logs(
                dst_chain_hash_hex,
                counter,
                BlockTag::Number(start),
                BlockTag::Number(end),
            )
            .await
        {
            Ok(mut window_logs) => logs.append(&mut window_logs),
            Err(e) => {
                warn!(start, end, error = %e, "iterative scan window failed, skipping");
            }
        }
        if end == to {
            break;
        }
        start = end + 1;
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    /// What is tested: window arithmetic around the single-query fallback
    /// Why: an off-by-one in the window count silently turns a bounded scan
    /// into a full-range query or vice versa
    #[test]
    fn window_count_boundaries() {
        // 5000 blocks in windows of 1000 -> exactly 5 windows
        assert_eq!(5000u64.div_ceil(1000), 5);
        // one extra block tips it over
        assert_eq!(5001u64.div_ceil(1000), 6);
    }
}
