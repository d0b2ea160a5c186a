//! Message proxy contract binding.
//!
//! The message proxy is the on-chain contract that records outgoing messages
//! in an append-only log and accepts incoming signed batches. This module
//! owns the ABI surface consumed by the agent: the `OutgoingMessage`,
//! `PreviousMessageReference` and `PostMessageError` events, the counter
//! views, and `postIncomingMessages` calldata assembly. It also computes the
//! wire hashes the destination proxy and the signing service agree on.

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use tracing::warn;

use crate::error::{AgentError, AgentResult};
use crate::rpc::{BlockTag, LogEntry, LogFilter, RpcClient};

pub mod abi {
    //! Solidity types of the message proxy surface.
    alloy::sol! {
        #[derive(Debug)]
        struct Message {
            address sender;
            address destinationContract;
            bytes data;
        }

        #[derive(Debug)]
        struct Signature {
            uint256[2] blsSignature;
            uint256 hashA;
            uint256 hashB;
            uint256 counter;
        }

        event OutgoingMessage(
            bytes32 indexed dstChainHash,
            uint256 indexed msgCounter,
            address indexed srcContract,
            address dstContract,
            bytes data
        );

        event PreviousMessageReference(
            uint256 currentMessage,
            uint256 previousOutgoingMessageBlockId
        );

        event PostMessageError(uint256 msgCounter, bytes reason);

        function getOutgoingMessagesCounter(string targetChainName) external view returns (uint256);
        function getIncomingMessagesCounter(string fromChainName) external view returns (uint256);
        function getLastOutgoingMessageBlockId(string targetChainName) external view returns (uint256);
        function postIncomingMessages(
            string fromChainName,
            uint256 startingCounter,
            Message[] messages,
            Signature sign
        ) external;
    }
}

// ============================================================================
// DOMAIN TYPES
// ============================================================================

/// One outgoing message observed on a source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Contract that posted the message on the source chain
    pub sender: Address,
    /// Contract that receives the message on the destination chain
    pub destination_contract: Address,
    /// Opaque payload forwarded to the destination contract
    pub data: Vec<u8>,
    /// Source block the message was observed in
    pub saved_block_number: u64,
}

/// Threshold-BLS aggregate over a batch hash, in the destination proxy's
/// wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlsSignature {
    pub bls_signature: [U256; 2],
    pub hash_a: U256,
    pub hash_b: U256,
    /// String-of-uint per the wire contract
    pub counter: String,
}

impl BlsSignature {
    /// All-zero placeholder. Accepted by destination proxies only in test
    /// deployments.
    pub fn zero() -> Self {
        Self {
            bls_signature: [U256::ZERO, U256::ZERO],
            hash_a: U256::ZERO,
            hash_b: U256::ZERO,
            counter: "0".to_string(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.bls_signature == [U256::ZERO, U256::ZERO]
            && self.hash_a == U256::ZERO
            && self.hash_b == U256::ZERO
    }

    fn to_abi(&self) -> abi::Signature {
        abi::Signature {
            blsSignature: self.bls_signature,
            hashA: self.hash_a,
            hashB: self.hash_b,
            counter: U256::from_str_radix(&self.counter, 10).unwrap_or(U256::ZERO),
        }
    }
}

/// One record of the reference walk-back chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceLogRecord {
    /// Message counter the record belongs to
    pub current_message: u64,
    /// Block of the previous outgoing message, 0 at the chain start
    pub previous_outgoing_message_block_id: u64,
    /// Block the record itself was emitted in
    pub current_block_id: u64,
}

// ============================================================================
// WIRE HASHES
// ============================================================================

/// Hash of a chain name, the `dstChainHash` topic value.
pub fn chain_hash(name: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Hex form of [`chain_hash`] usable as a log topic.
pub fn chain_hash_topic(name: &str) -> String {
    format!("0x{}", hex::encode(chain_hash(name)))
}

/// Counter as a 32-byte log topic.
pub fn counter_topic(counter: u64) -> String {
    format!("0x{counter:064x}")
}

/// Hash the destination proxy and the signing service compute over a batch:
/// keccak of the concatenation, for each message in order, of the 20-byte
/// sender, the 20-byte destination contract and the raw payload.
pub fn batch_hash(messages: &[Message]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for message in messages {
        hasher.update(message.sender.as_slice());
        hasher.update(message.destination_contract.as_slice());
        hasher.update(&message.data);
    }
    hasher.finalize().into()
}

// ============================================================================
// PROXY BINDING
// ============================================================================

/// Binding of one message proxy contract on one endpoint.
#[derive(Clone)]
pub struct MessageProxy {
    client: RpcClient,
    address: String,
}

impl MessageProxy {
    pub fn new(client: RpcClient, address: &str) -> Self {
        Self {
            client,
            address: address.to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    async fn counter_view(&self, op: &'static str, calldata: Vec<u8>) -> AgentResult<u64> {
        let request = crate::rpc::CallRequest {
            to: self.address.clone(),
            data: format!("0x{}", hex::encode(calldata)),
            ..Default::default()
        };
        let returned = self.client.call(&request, BlockTag::Latest).await?;
        let bytes = hex::decode(returned.strip_prefix("0x").unwrap_or(&returned)).map_err(|e| {
            AgentError::RpcExhausted {
                op,
                endpoint: self.client.url().to_string(),
                attempts: 1,
                last_error: format!("non-hex return data: {e}"),
            }
        })?;
        let value =
            U256::try_from_be_slice(&bytes).ok_or_else(|| AgentError::RpcExhausted {
                op,
                endpoint: self.client.url().to_string(),
                attempts: 1,
                last_error: format!("return data is not a uint256 ({} bytes)", bytes.len()),
            })?;
        Ok(u64::try_from(value).unwrap_or(u64::MAX))
    }

    /// `getOutgoingMessagesCounter(targetChainName)` on this proxy.
    pub async fn outgoing_messages_counter(&self, target_chain: &str) -> AgentResult<u64> {
        let call = abi::getOutgoingMessagesCounterCall {
            targetChainName: target_chain.to_string(),
        };
        self.counter_view("getOutgoingMessagesCounter", call.abi_encode())
            .await
    }

    /// `getIncomingMessagesCounter(fromChainName)` on this proxy.
    pub async fn incoming_messages_counter(&self, from_chain: &str) -> AgentResult<u64> {
        let call = abi::getIncomingMessagesCounterCall {
            fromChainName: from_chain.to_string(),
        };
        self.counter_view("getIncomingMessagesCounter", call.abi_encode())
            .await
    }

    /// `getLastOutgoingMessageBlockId(targetChainName)` on this proxy.
    pub async fn last_outgoing_message_block_id(&self, target_chain: &str) -> AgentResult<u64> {
        let call = abi::getLastOutgoingMessageBlockIdCall {
            targetChainName: target_chain.to_string(),
        };
        self.counter_view("getLastOutgoingMessageBlockId", call.abi_encode())
            .await
    }

    /// Raw `OutgoingMessage` logs for `(dst_chain_hash, counter)` in the
    /// block range. A `counter` of `None` matches all counters.
    pub async fn outgoing_message_logs(
        &self,
        dst_chain_hash_hex: &str,
        counter: Option<u64>,
        from_block: BlockTag,
        to_block: BlockTag,
    ) -> AgentResult<Vec<LogEntry>> {
        let filter = LogFilter {
            address: self.address.clone(),
            topics: vec![
                Some(format!("0x{}", hex::encode(abi::OutgoingMessage::SIGNATURE_HASH))),
                Some(dst_chain_hash_hex.to_string()),
                counter.map(counter_topic),
            ],
            from_block,
            to_block,
        };
        self.client.get_logs(&filter).await
    }

    /// `PreviousMessageReference` records emitted in `block`.
    pub async fn reference_logs_at(&self, block: u64) -> AgentResult<Vec<ReferenceLogRecord>> {
        let filter = LogFilter {
            address: self.address.clone(),
            topics: vec![Some(format!(
                "0x{}",
                hex::encode(abi::PreviousMessageReference::SIGNATURE_HASH)
            ))],
            from_block: BlockTag::Number(block),
            to_block: BlockTag::Number(block),
        };
        let logs = self.client.get_logs(&filter).await?;
        Ok(logs
            .iter()
            .filter_map(|log| {
                let (topics, data) = decode_parts(log)?;
                let event =
                    abi::PreviousMessageReference::decode_raw_log(topics, &data, true).ok()?;
                Some(ReferenceLogRecord {
                    current_message: u64::try_from(event.currentMessage).unwrap_or(u64::MAX),
                    previous_outgoing_message_block_id: u64::try_from(
                        event.previousOutgoingMessageBlockId,
                    )
                    .unwrap_or(u64::MAX),
                    current_block_id: log.block_number_u64(),
                })
            })
            .collect())
    }

    /// `PostMessageError` reasons emitted by this proxy in the transaction
    /// `tx_hash` of `block`. An empty result is the success invariant.
    pub async fn post_message_errors(
        &self,
        block: u64,
        tx_hash: &str,
    ) -> AgentResult<Vec<String>> {
        let filter = LogFilter {
            address: self.address.clone(),
            topics: vec![Some(format!(
                "0x{}",
                hex::encode(abi::PostMessageError::SIGNATURE_HASH)
            ))],
            from_block: BlockTag::Number(block),
            to_block: BlockTag::Number(block),
        };
        let logs = self.client.get_logs(&filter).await?;
        Ok(logs
            .iter()
            .filter(|log| log.transaction_hash.eq_ignore_ascii_case(tx_hash))
            .filter_map(|log| {
                let (topics, data) = decode_parts(log)?;
                let event = abi::PostMessageError::decode_raw_log(topics, &data, true).ok()?;
                Some(format!(
                    "message {}: {}",
                    event.msgCounter,
                    String::from_utf8_lossy(&event.reason)
                ))
            })
            .collect())
    }

    /// Calldata for `postIncomingMessages(fromChainName, startingCounter,
    /// messages, sign)` on the destination proxy.
    pub fn post_incoming_messages_calldata(
        from_chain: &str,
        starting_counter: u64,
        messages: &[Message],
        signature: &BlsSignature,
    ) -> Vec<u8> {
        let call = abi::postIncomingMessagesCall {
            fromChainName: from_chain.to_string(),
            startingCounter: U256::from(starting_counter),
            messages: messages
                .iter()
                .map(|m| abi::Message {
                    sender: m.sender,
                    destinationContract: m.destination_contract,
                    data: m.data.clone().into(),
                })
                .collect(),
            sign: signature.to_abi(),
        };
        call.abi_encode()
    }
}

/// Decodes an `OutgoingMessage` log entry into a [`Message`]. Logs that do
/// not match the event shape are skipped with a warning, mirroring how the
/// rest of the agent treats malformed third-party data.
pub fn decode_outgoing_message(log: &LogEntry) -> Option<Message> {
    let (topics, data) = decode_parts(log)?;
    match abi::OutgoingMessage::decode_raw_log(topics, &data, true) {
        Ok(event) => Some(Message {
            sender: event.srcContract,
            destination_contract: event.dstContract,
            data: event.data.to_vec(),
            saved_block_number: log.block_number_u64(),
        }),
        Err(e) => {
            warn!(
                tx = %log.transaction_hash,
                error = %e,
                "skipping malformed OutgoingMessage log"
            );
            None
        }
    }
}

fn decode_parts(log: &LogEntry) -> Option<(Vec<B256>, Vec<u8>)> {
    let topics: Option<Vec<B256>> = log.topics.iter().map(|t| t.parse().ok()).collect();
    let data = hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data)).ok()?;
    Some((topics?, data))
}
