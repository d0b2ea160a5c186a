//! Historical event scanning strategies.
//!
//! Three strategies cover the search for `OutgoingMessage` logs:
//!
//! * [`iterative`] - split a bounded range into fixed windows and query each;
//! * [`progressive`] - for the unbounded `[0, latest]` range, try widening
//!   look-back windows before falling back to the full range;
//! * [`reference`] - walk the `PreviousMessageReference` chain backwards to
//!   obtain one exact block per message, bounding every `getLogs` to a
//!   single block.
//!
//! The façade in this module picks a strategy from the requested range and
//! the runtime flags; the reference walk-back is consulted separately by the
//! batch former because it yields per-message windows rather than one range.

use crate::error::AgentResult;
use crate::proxy::MessageProxy;
use crate::rpc::LogEntry;

pub mod iterative;
pub mod progressive;
pub mod reference;

/// Scan tuning knobs, from the transfer configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Use the progressive widening scan for unbounded ranges
    pub progressive: bool,
    /// Window size of the iterative scan, in blocks
    pub window: u64,
    /// Maximum number of iterative windows before a single-range fallback
    pub max_windows: u64,
}

impl ScanOptions {
    pub fn from_config(config: &crate::config::TransferConfig) -> Self {
        Self {
            progressive: config.progressive_scan,
            window: config.blocks_in_iterative_step,
            max_windows: config.max_iterations_in_all_range,
        }
    }
}

/// Result of one scan: the matching logs and the last block the scan
/// observed (the chain head for unbounded ranges).
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub logs: Vec<LogEntry>,
    pub last_block: u64,
}

/// Scans for `OutgoingMessage` logs matching `(dst_chain_hash, counter)` in
/// `[from, to]`, where `to = None` means the current chain head.
///
/// `[0, latest]` with the progressive flag set uses the widening look-back
/// scan; every other range is scanned iteratively.
pub async fn scan_outgoing_messages(
    proxy: &MessageProxy,
    dst_chain_hash_hex: &str,
    counter: Option<u64>,
    from: u64,
    to: Option<u64>,
    opts: ScanOptions,
) -> AgentResult<ScanResult> {
    let latest = proxy.client().get_block_number().await?;
    let to = to.unwrap_or(latest);

    let logs = if from == 0 && to >= latest && opts.progressive {
        progressive::scan(proxy, dst_chain_hash_hex, counter, latest).await?
    } else {
        iterative::scan(
            proxy,
            dst_chain_hash_hex,
            counter,
            from,
            to.min(latest),
            opts.window,
            opts.max_windows,
        )
        .await?
    };

    Ok(ScanResult {
        logs,
        last_block: latest,
    })
}
