//! Process-wide error-category registry and transfer event stream.
//!
//! Each transfer loop records its most recent failure under a category tag
//! (e.g. "loop-M2S"); a later success on the same category clears it. A
//! bounded ring keeps the most recent failure records for observability.
//! Both views are read-only for consumers; the registry never influences
//! transfer decisions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

/// Default bound for the recent-failures ring.
pub const DEFAULT_RECENT_FAILURES_CAP: usize = 20;

/// One recorded failure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureRecord {
    /// Category tag, e.g. "loop-M2S" or "oracle".
    pub category: String,
    /// Failure text as reported by the failing component.
    pub detail: String,
    /// Unix timestamp when the failure was recorded.
    pub ts: u64,
}

/// Typed transfer lifecycle event published on the broadcast channel.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A pass on `category` completed without error.
    Success { category: String },
    /// A pass on `category` failed with `detail`.
    Failure {
        category: String,
        detail: String,
        ts: u64,
    },
}

/// Registry of the most recent failure per category plus a bounded ring of
/// recent failure records. Shared across all direction loops.
pub struct ErrorRegistry {
    latest: RwLock<HashMap<String, String>>,
    recent: RwLock<VecDeque<FailureRecord>>,
    cap: usize,
    events: broadcast::Sender<TransferEvent>,
}

impl ErrorRegistry {
    pub fn new(cap: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            latest: RwLock::new(HashMap::new()),
            recent: RwLock::new(VecDeque::new()),
            cap,
            events,
        })
    }

    /// Records a failure under `category`, pushes it onto the ring and
    /// publishes a `TransferEvent::Failure`.
    pub async fn record_failure(&self, category: &str, detail: &str) {
        let ts = chrono::Utc::now().timestamp() as u64;
        {
            let mut latest = self.latest.write().await;
            latest.insert(category.to_string(), detail.to_string());
        }
        {
            let mut recent = self.recent.write().await;
            recent.push_back(FailureRecord {
                category: category.to_string(),
                detail: detail.to_string(),
                ts,
            });
            while recent.len() > self.cap {
                recent.pop_front();
            }
        }
        let _ = self.events.send(TransferEvent::Failure {
            category: category.to_string(),
            detail: detail.to_string(),
            ts,
        });
    }

    /// Clears the category and publishes a `TransferEvent::Success`.
    pub async fn record_success(&self, category: &str) {
        let mut latest = self.latest.write().await;
        latest.remove(category);
        drop(latest);
        let _ = self.events.send(TransferEvent::Success {
            category: category.to_string(),
        });
    }

    /// Snapshot of the most recent failure text per category.
    pub async fn latest_failures(&self) -> HashMap<String, String> {
        self.latest.read().await.clone()
    }

    /// Snapshot of the bounded recent-failures ring, oldest first.
    pub async fn recent_failures(&self) -> Vec<FailureRecord> {
        self.recent.read().await.iter().cloned().collect()
    }

    /// Subscribes to the transfer event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What is tested: a success clears the latest failure for its category
    /// Why: consumers must be able to tell a currently-failing direction from
    /// one that recovered
    #[tokio::test]
    async fn success_clears_category() {
        let registry = ErrorRegistry::new(DEFAULT_RECENT_FAILURES_CAP);
        registry.record_failure("loop-M2S", "rpc exhausted").await;
        assert_eq!(
            registry.latest_failures().await.get("loop-M2S").map(String::as_str),
            Some("rpc exhausted")
        );

        registry.record_success("loop-M2S").await;
        assert!(registry.latest_failures().await.get("loop-M2S").is_none());
        // The ring keeps history even after the category clears.
        assert_eq!(registry.recent_failures().await.len(), 1);
    }

    /// What is tested: the recent-failures ring drops the oldest record once
    /// the cap is exceeded
    /// Why: the ring is bounded by design, it must never grow with uptime
    #[tokio::test]
    async fn ring_is_bounded() {
        let registry = ErrorRegistry::new(3);
        for i in 0..5 {
            registry.record_failure("loop-S2M", &format!("failure {i}")).await;
        }
        let recent = registry.recent_failures().await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail, "failure 2");
        assert_eq!(recent[2].detail, "failure 4");
    }

    /// What is tested: failures and successes are published on the broadcast
    /// channel in order
    /// Why: external observers consume the typed event stream instead of
    /// polling the registry
    #[tokio::test]
    async fn events_are_broadcast() {
        let registry = ErrorRegistry::new(DEFAULT_RECENT_FAILURES_CAP);
        let mut rx = registry.subscribe();

        registry.record_failure("oracle", "gas price fetch failed").await;
        registry.record_success("oracle").await;

        match rx.recv().await.unwrap() {
            TransferEvent::Failure { category, detail, .. } => {
                assert_eq!(category, "oracle");
                assert_eq!(detail, "gas price fetch failed");
            }
            other => panic!("expected failure event, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            TransferEvent::Success { category } => assert_eq!(category, "oracle"),
            other => panic!("expected success event, got {other:?}"),
        }
    }
}
