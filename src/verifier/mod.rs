//! S->S cross-node message verification.
//!
//! An S-chain's RPC endpoint is one node's view. Before relaying a batch
//! whose origin is an S-chain, each message is re-queried on every node of
//! the source chain's roster at the block the message was observed in, and
//! accepted only when a quorum of nodes confirms the same `(sender,
//! destinationContract)` pair. A node that answers differently - or not at
//! all - counts as a dissent. Too many dissents reject the whole batch.

use tracing::{debug, warn};

use crate::config::NodeConfig;
use crate::error::{AgentError, AgentResult};
use crate::proxy::{decode_outgoing_message, Message, MessageProxy};
use crate::rpc::{BlockTag, RpcClient};

/// Minimum number of confirming nodes for a roster of `n`: ceil(2n/3).
///
/// The fixed points of the schedule: 1 node needs 1, 2 need 2, 4 need 3,
/// 16 need 11.
pub fn quorum(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (2 * n).div_ceil(3)
}

/// Verifies every message of a batch against the source chain's roster.
///
/// Short-circuits per message once the quorum is reached, and rejects the
/// whole batch as soon as more than `n - quorum` nodes dissent on any
/// message.
pub async fn verify_batch(
    messages: &[Message],
    start_counter: u64,
    roster: &[NodeConfig],
    proxy_address: &str,
    dst_chain_hash_hex: &str,
) -> AgentResult<()> {
    let n = roster.len();
    let required = quorum(n);
    if n == 0 {
        // No roster means no cross-node check is possible; the transfer
        // options decide whether rosterless sources are allowed at all.
        return Ok(());
    }

    let proxies: Vec<MessageProxy> = roster
        .iter()
        .filter_map(|node| match RpcClient::new(&node.url, 1) {
            Ok(client) => Some(MessageProxy::new(client, proxy_address)),
            Err(e) => {
                warn!(node = %node.name, error = %e, "cannot build verifier client");
                None
            }
        })
        .collect();

    for (i, message) in messages.iter().enumerate() {
        let counter = start_counter + i as u64;
        let mut passes = 0usize;
        // Roster entries that never produced a client dissent by default.
        let mut fails = n - proxies.len();

        if fails > n - required {
            return Err(AgentError::S2SQuorum {
                fails,
                nodes: n,
                quorum: required,
            });
        }

        for proxy in &proxies {
            let confirmed = confirm_on_node(proxy, message, counter, dst_chain_hash_hex).await;
            if confirmed {
                passes += 1;
            } else {
                fails += 1;
            }
            if passes >= required {
                break;
            }
            if fails > n - required {
                return Err(AgentError::S2SQuorum {
                    fails,
                    nodes: n,
                    quorum: required,
                });
            }
        }

        if passes < required {
            return Err(AgentError::S2SQuorum {
                fails,
                nodes: n,
                quorum: required,
            });
        }
        debug!(counter, passes, nodes = n, "message confirmed by quorum");
    }

    Ok(())
}

/// Queries one node for the message at its saved block and compares the
/// reference fields.
async fn confirm_on_node(
    proxy: &MessageProxy,
    reference: &Message,
    counter: u64,
    dst_chain_hash_hex: &str,
) -> bool {
    let logs = match proxy
        .outgoing_message_logs(
            dst_chain_hash_hex,
            Some(counter),
            BlockTag::Number(reference.saved_block_number),
            BlockTag::Number(reference.saved_block_number),
        )
        .await
    {
        Ok(logs) => logs,
        Err(e) => {
            warn!(endpoint = %proxy.client().url(), counter, error = %e, "verifier node query failed");
            return false;
        }
    };

    logs.iter().filter_map(decode_outgoing_message).any(|m| {
        m.sender == reference.sender && m.destination_contract == reference.destination_contract
    })
}
