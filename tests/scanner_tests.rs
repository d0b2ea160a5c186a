//! Integration tests for the event scanning strategies.

use alloy::primitives::Address;

use ima_agent::proxy::{chain_hash_topic, MessageProxy};
use ima_agent::rpc::RpcClient;
use ima_agent::scanner::{self, reference, ScanOptions};

#[path = "helpers.rs"]
mod helpers;
use helpers::{MockChain, DUMMY_DST_CONTRACT, DUMMY_PROXY_ADDR, DUMMY_SENDER};

fn sender() -> Address {
    DUMMY_SENDER.parse().unwrap()
}

fn dst_contract() -> Address {
    DUMMY_DST_CONTRACT.parse().unwrap()
}

fn proxy_for(chain: &MockChain) -> MessageProxy {
    let client = RpcClient::new(&chain.url(), 2).unwrap();
    MessageProxy::new(client, DUMMY_PROXY_ADDR)
}

fn scan_options() -> ScanOptions {
    ScanOptions {
        progressive: true,
        window: 1_000,
        max_windows: 5_000,
    }
}

/// What is tested: the progressive scan widens past empty day and week
/// windows and stops at the first window with a hit
/// Why: scenario coverage - a message a month old must be found without a
/// full-history query
#[tokio::test]
async fn progressive_scan_miss_then_hit() {
    let chain = MockChain::start().await;
    chain.with_state(|s| s.head = 300_000);
    // One message at block 200_000: outside the 1-day (291_360+) and 1-week
    // (239_520+) look-backs, inside the 1-month (40_800+) look-back.
    chain.push_outgoing_message("Bob", 0, 200_000, sender(), dst_contract(), b"payload");

    let proxy = proxy_for(&chain);
    let result = scanner::scan_outgoing_messages(
        &proxy,
        &chain_hash_topic("Bob"),
        Some(0),
        0,
        None,
        scan_options(),
    )
    .await
    .unwrap();

    assert_eq!(result.logs.len(), 1);
    assert_eq!(result.last_block, 300_000);
    // day, week, month - the year windows were never queried
    assert_eq!(chain.with_state(|s| s.get_logs_calls), 3);
}

/// What is tested: an empty chain yields an empty progressive result after
/// the full ladder plus the full-range fallback
/// Why: boundary behavior - no hits is a valid outcome, not an error
#[tokio::test]
async fn progressive_scan_empty_chain() {
    let chain = MockChain::start().await;
    chain.with_state(|s| s.head = 50_000);

    let proxy = proxy_for(&chain);
    let result = scanner::scan_outgoing_messages(
        &proxy,
        &chain_hash_topic("Bob"),
        Some(0),
        0,
        None,
        scan_options(),
    )
    .await
    .unwrap();

    assert!(result.logs.is_empty());
}

/// What is tested: a bounded range is split into fixed windows and all hits
/// across windows are collected
/// Why: public endpoints cap getLogs ranges; the iterative scan is the
/// only strategy that respects the cap
#[tokio::test]
async fn iterative_scan_collects_across_windows() {
    let chain = MockChain::start().await;
    chain.with_state(|s| s.head = 2_500);
    chain.push_outgoing_message("Bob", 0, 150, sender(), dst_contract(), b"m0");
    chain.push_outgoing_message("Bob", 1, 1_200, sender(), dst_contract(), b"m1");
    chain.push_outgoing_message("Bob", 2, 2_400, sender(), dst_contract(), b"m2");

    let proxy = proxy_for(&chain);
    let result = scanner::scan_outgoing_messages(
        &proxy,
        &chain_hash_topic("Bob"),
        None,
        0,
        Some(2_500),
        ScanOptions {
            progressive: false,
            window: 1_000,
            max_windows: 5_000,
        },
    )
    .await
    .unwrap();

    assert_eq!(result.logs.len(), 3);
    // [0,999] [1000,1999] [2000,2500]
    assert_eq!(chain.with_state(|s| s.get_logs_calls), 3);
}

/// What is tested: when the window count would exceed the cap the scan
/// falls back to a single full-range query
/// Why: the cap bounds the number of round trips on huge ranges
#[tokio::test]
async fn iterative_scan_single_query_fallback() {
    let chain = MockChain::start().await;
    chain.with_state(|s| s.head = 100_000);
    chain.push_outgoing_message("Bob", 0, 77, sender(), dst_contract(), b"m0");

    let proxy = proxy_for(&chain);
    let result = scanner::scan_outgoing_messages(
        &proxy,
        &chain_hash_topic("Bob"),
        Some(0),
        0,
        Some(100_000),
        ScanOptions {
            progressive: false,
            window: 10,
            max_windows: 100,
        },
    )
    .await
    .unwrap();

    assert_eq!(result.logs.len(), 1);
    assert_eq!(chain.with_state(|s| s.get_logs_calls), 1);
}

/// What is tested: the walk-back follows the reference chain from the last
/// outgoing message down to the incoming counter
/// Why: it bounds every batch-former getLogs to one exact block
#[tokio::test]
async fn reference_walk_back() {
    let chain = MockChain::start().await;
    chain.with_state(|s| {
        s.head = 100;
        s.last_ref_block = 70;
    });
    // Messages 2, 3, 4 at blocks 30, 50, 70, chained backwards.
    chain.push_reference(2, 10, 30);
    chain.push_reference(3, 30, 50);
    chain.push_reference(4, 50, 70);

    let proxy = proxy_for(&chain);
    let records = reference::walk_back(&proxy, "Bob", 3, 5).await.unwrap().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(reference::window_for(&records, 3), Some(50));
    assert_eq!(reference::window_for(&records, 4), Some(70));
    assert_eq!(reference::window_for(&records, 2), None);
}

/// What is tested: a proxy without reference logs makes the walk-back
/// return None
/// Why: older proxies do not emit references; the caller must fall back to
/// the progressive scan instead of treating this as fatal
#[tokio::test]
async fn reference_walk_back_absent() {
    let chain = MockChain::start().await;
    chain.with_state(|s| {
        s.head = 100;
        s.last_ref_block = 0;
    });

    let proxy = proxy_for(&chain);
    assert!(reference::walk_back(&proxy, "Bob", 0, 3).await.unwrap().is_none());

    // A nonzero start block whose reference log is missing also degrades.
    chain.with_state(|s| s.last_ref_block = 42);
    assert!(reference::walk_back(&proxy, "Bob", 0, 3).await.unwrap().is_none());
}
