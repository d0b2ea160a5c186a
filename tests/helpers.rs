//! Mock chain setup helpers for integration tests.
//!
//! `MockChain` is a wiremock server speaking the subset of the Ethereum
//! JSON-RPC surface the agent uses, backed by a mutable in-memory chain
//! state: head block, message proxy counters, stored event logs and
//! submission recording. Tests push `OutgoingMessage`, reference and
//! `PostMessageError` logs into the state and point real agent components
//! at the server URL.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use ima_agent::proxy::{abi, chain_hash_topic, counter_topic};

pub const DUMMY_PROXY_ADDR: &str = "0xd2aaa00100000000000000000000000000000000";
pub const DUMMY_SENDER: &str = "0x71c7656ec7ab88b098defb751b7401b5f6d8976f";
pub const DUMMY_DST_CONTRACT: &str = "0x57ad10e3f8c8d9b9b2a55cfa2bb35beec0ba0e4f";

// Well-known development key, not a secret.
pub const DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// One stored event log.
#[derive(Debug, Clone)]
pub struct StoredLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// Mutable state of one mock chain.
#[derive(Debug)]
pub struct ChainState {
    pub head: u64,
    /// Block timestamps are `base_timestamp + block`
    pub base_timestamp: u64,
    pub logs: Vec<StoredLog>,
    pub out_cnt: u64,
    pub in_cnt: u64,
    pub last_ref_block: u64,
    pub gas_price: u128,
    pub balance: u128,
    pub nonce: u64,
    pub estimate: u64,
    /// Dry-run revert reason for `postIncomingMessages`
    pub revert_reason: Option<String>,
    pub receipt_status: &'static str,
    /// Raw transactions received via eth_sendRawTransaction
    pub submissions: Vec<String>,
    /// Advance `in_cnt` by this much on every submission
    pub advance_in_on_submit: u64,
    pub get_logs_calls: u64,
    /// Gas field of the last dry-run eth_call, if any
    pub last_call_gas: Option<u64>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            head: 100,
            base_timestamp: 1_600_000_000,
            logs: Vec::new(),
            out_cnt: 0,
            in_cnt: 0,
            last_ref_block: 0,
            gas_price: 1_000_000_000,
            balance: 10u128.pow(20),
            nonce: 0,
            estimate: 100_000,
            revert_reason: None,
            receipt_status: "0x1",
            submissions: Vec::new(),
            advance_in_on_submit: 0,
            get_logs_calls: 0,
            last_call_gas: None,
        }
    }
}

pub struct MockChain {
    pub server: MockServer,
    pub state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(ChainState::default()));
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ChainResponder {
                state: state.clone(),
            })
            .mount(&server)
            .await;
        Self { server, state }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Stores an `OutgoingMessage(dst, counter)` log at `block`.
    pub fn push_outgoing_message(
        &self,
        dst_name: &str,
        counter: u64,
        block: u64,
        sender: Address,
        dst_contract: Address,
        payload: &[u8],
    ) {
        let data = (dst_contract, Bytes::from(payload.to_vec())).abi_encode();
        let log = StoredLog {
            address: DUMMY_PROXY_ADDR.to_string(),
            topics: vec![
                format!("0x{}", hex::encode(abi::OutgoingMessage::SIGNATURE_HASH)),
                chain_hash_topic(dst_name),
                counter_topic(counter),
                format!("0x{:0>64}", hex::encode(sender.as_slice())),
            ],
            data: format!("0x{}", hex::encode(data)),
            block,
            tx_hash: format!("0x{:064x}", 0xfeed_0000u64 + counter),
            log_index: 0,
        };
        self.state.lock().unwrap().logs.push(log);
    }

    /// Stores a `PreviousMessageReference(counter, prev_block)` log at `block`.
    pub fn push_reference(&self, counter: u64, prev_block: u64, block: u64) {
        let data = (U256::from(counter), U256::from(prev_block)).abi_encode();
        let log = StoredLog {
            address: DUMMY_PROXY_ADDR.to_string(),
            topics: vec![format!(
                "0x{}",
                hex::encode(abi::PreviousMessageReference::SIGNATURE_HASH)
            )],
            data: format!("0x{}", hex::encode(data)),
            block,
            tx_hash: format!("0x{:064x}", 0xbeef_0000u64 + counter),
            log_index: 1,
        };
        self.state.lock().unwrap().logs.push(log);
    }

    /// Stores a `PostMessageError(counter, reason)` log at `block` inside
    /// transaction `tx_hash`.
    pub fn push_post_message_error(&self, counter: u64, reason: &str, block: u64, tx_hash: &str) {
        let data = (U256::from(counter), Bytes::from(reason.as_bytes().to_vec())).abi_encode();
        let log = StoredLog {
            address: DUMMY_PROXY_ADDR.to_string(),
            topics: vec![format!(
                "0x{}",
                hex::encode(abi::PostMessageError::SIGNATURE_HASH)
            )],
            data: format!("0x{}", hex::encode(data)),
            block,
            tx_hash: tx_hash.to_string(),
            log_index: 2,
        };
        self.state.lock().unwrap().logs.push(log);
    }
}

/// Hash the mock returns for the `n`-th submission (1-based).
pub fn submitted_tx_hash(n: u64) -> String {
    format!("0x{n:064x}")
}

// ============================================================================
// RESPONDER
// ============================================================================

struct ChainResponder {
    state: Arc<Mutex<ChainState>>,
}

impl Respond for ChainResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return rpc_error(-32700, "parse error", None);
        };
        let method = body["method"].as_str().unwrap_or_default();
        let params = body["params"].as_array().cloned().unwrap_or_default();
        let mut state = self.state.lock().unwrap();

        let result: Value = match method {
            "eth_blockNumber" => quantity(state.head),
            "eth_gasPrice" => quantity_u128(state.gas_price),
            "eth_getBalance" => quantity_u128(state.balance),
            "eth_getTransactionCount" => quantity(state.nonce),
            "eth_estimateGas" => quantity(state.estimate),
            "eth_getBlockByNumber" => {
                let block = parse_tag(params.first(), state.head);
                json!({
                    "number": format!("0x{block:x}"),
                    "timestamp": format!("0x{:x}", state.base_timestamp + block),
                })
            }
            "eth_call" => return eth_call(&mut state, params.first()),
            "eth_getLogs" => {
                state.get_logs_calls += 1;
                get_logs(&state, params.first())
            }
            "eth_sendRawTransaction" => {
                let raw = params
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                state.submissions.push(raw);
                state.in_cnt += state.advance_in_on_submit;
                Value::String(submitted_tx_hash(state.submissions.len() as u64))
            }
            "eth_getTransactionReceipt" => {
                let hash = params.first().and_then(Value::as_str).unwrap_or_default();
                json!({
                    "transactionHash": hash,
                    "blockNumber": format!("0x{:x}", state.head),
                    "status": state.receipt_status,
                    "gasUsed": "0x7a120",
                    "effectiveGasPrice": format!("0x{:x}", state.gas_price),
                })
            }
            _ => return rpc_error(-32601, &format!("method {method} not found"), None),
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        }))
    }
}

fn eth_call(state: &mut ChainState, call: Option<&Value>) -> ResponseTemplate {
    let Some(call) = call else {
        return rpc_error(-32602, "missing call object", None);
    };
    let data = call["data"].as_str().unwrap_or_default();
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data)).unwrap_or_default();
    let selector: [u8; 4] = bytes
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .unwrap_or_default();

    if let Some(gas) = call["gas"].as_str() {
        state.last_call_gas = u64::from_str_radix(gas.trim_start_matches("0x"), 16).ok();
    }

    let result = if selector == abi::getOutgoingMessagesCounterCall::SELECTOR {
        word(state.out_cnt)
    } else if selector == abi::getIncomingMessagesCounterCall::SELECTOR {
        word(state.in_cnt)
    } else if selector == abi::getLastOutgoingMessageBlockIdCall::SELECTOR {
        word(state.last_ref_block)
    } else if selector == abi::postIncomingMessagesCall::SELECTOR {
        if let Some(reason) = &state.revert_reason {
            return rpc_error(
                3,
                "execution reverted",
                Some(Value::String(encode_error_string(reason))),
            );
        }
        "0x".to_string()
    } else {
        "0x".to_string()
    };

    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

fn get_logs(state: &ChainState, filter: Option<&Value>) -> Value {
    let Some(filter) = filter else {
        return json!([]);
    };
    let address = filter["address"].as_str().unwrap_or_default();
    let from = parse_tag(filter.get("fromBlock"), state.head);
    let to = parse_tag(filter.get("toBlock"), state.head);
    let topics = filter["topics"].as_array().cloned().unwrap_or_default();

    let matched: Vec<Value> = state
        .logs
        .iter()
        .filter(|log| log.address.eq_ignore_ascii_case(address))
        .filter(|log| log.block >= from && log.block <= to)
        .filter(|log| {
            topics.iter().enumerate().all(|(i, wanted)| match wanted {
                Value::String(topic) => log
                    .topics
                    .get(i)
                    .map(|t| t.eq_ignore_ascii_case(topic))
                    .unwrap_or(false),
                _ => true,
            })
        })
        .map(|log| {
            json!({
                "address": log.address,
                "topics": log.topics,
                "data": log.data,
                "blockNumber": format!("0x{:x}", log.block),
                "transactionHash": log.tx_hash,
                "logIndex": format!("0x{:x}", log.log_index),
            })
        })
        .collect();
    Value::Array(matched)
}

fn parse_tag(tag: Option<&Value>, head: u64) -> u64 {
    match tag.and_then(Value::as_str) {
        Some("latest") | None => head,
        Some(hex) => u64::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or(head),
    }
}

fn quantity(value: u64) -> Value {
    Value::String(format!("0x{value:x}"))
}

fn quantity_u128(value: u128) -> Value {
    Value::String(format!("0x{value:x}"))
}

fn word(value: u64) -> String {
    format!("0x{value:064x}")
}

fn rpc_error(code: i64, message: &str, data: Option<Value>) -> ResponseTemplate {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": error,
    }))
}

/// ABI-encodes `Error(string)` the way a reverting contract does.
pub fn encode_error_string(reason: &str) -> String {
    let mut bytes = vec![0x08, 0xc3, 0x79, 0xa0];
    bytes.extend_from_slice(&[0u8; 28]);
    bytes.extend_from_slice(&32u32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 28]);
    bytes.extend_from_slice(&(reason.len() as u32).to_be_bytes());
    bytes.extend_from_slice(reason.as_bytes());
    let pad = (32 - reason.len() % 32) % 32;
    bytes.extend(std::iter::repeat(0u8).take(pad));
    format!("0x{}", hex::encode(bytes))
}
