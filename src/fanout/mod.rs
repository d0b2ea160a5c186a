//! Direction fan-out.
//!
//! Schedules the M2S and S2M transfers plus one S2S transfer per sibling
//! S-chain. M2S and S2M are long-lived directions; S2S sources are rebuilt
//! every pass from a pseudo-randomly picked node URL of the sibling, so a
//! single stuck node does not pin the direction. The sibling list is a
//! point-in-time snapshot from the observer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, warn};

use crate::collector::SignatureCollector;
use crate::config::{ChainEndpointConfig, Config, SiblingChainConfig};
use crate::gas::GasPolicy;
use crate::proxy::MessageProxy;
use crate::registry::ErrorRegistry;
use crate::rpc::RpcClient;
use crate::scanner::ScanOptions;
use crate::signer::AgentSigner;
use crate::transfer::{Coordinator, TransferDirection, TransferLoopState, TransferOptions};

// ============================================================================
// COORDINATOR AND OBSERVER
// ============================================================================

/// In-process coordinator: grants a pass only while no other pass of the
/// same `(direction, index)` is between start and end.
#[derive(Default)]
pub struct LocalCoordinator {
    busy: Mutex<HashSet<(String, usize)>>,
}

impl Coordinator for LocalCoordinator {
    fn check_start(&self, direction: &str, index: usize) -> bool {
        let busy = self.busy.lock().expect("coordinator lock poisoned");
        !busy.contains(&(direction.to_string(), index))
    }

    fn notify_start(&self, direction: &str, index: usize) {
        let mut busy = self.busy.lock().expect("coordinator lock poisoned");
        busy.insert((direction.to_string(), index));
    }

    fn notify_end(&self, direction: &str, index: usize) {
        let mut busy = self.busy.lock().expect("coordinator lock poisoned");
        busy.remove(&(direction.to_string(), index));
    }
}

/// Source of the sibling chain snapshot. Production deployments plug the
/// network observer in; the static implementation serves fixed
/// configurations and tests.
pub trait ChainObserver: Send + Sync {
    fn list_sibling_chains(&self) -> Vec<SiblingChainConfig>;
}

pub struct StaticObserver {
    siblings: Vec<SiblingChainConfig>,
}

impl StaticObserver {
    pub fn new(siblings: Vec<SiblingChainConfig>) -> Self {
        Self { siblings }
    }
}

impl ChainObserver for StaticObserver {
    fn list_sibling_chains(&self) -> Vec<SiblingChainConfig> {
        self.siblings.clone()
    }
}

// ============================================================================
// FAN-OUT
// ============================================================================

/// Result of one fan-out pass across all directions.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub m2s_submitted: u64,
    pub s2m_submitted: u64,
    pub s2s_submitted: u64,
    /// Number of sibling directions that failed this pass
    pub failed_siblings: usize,
    /// No direction failed
    pub success: bool,
}

pub struct FanOut {
    config: Config,
    signer: Arc<AgentSigner>,
    collector: Arc<SignatureCollector>,
    registry: Arc<ErrorRegistry>,
    coordinator: Arc<dyn Coordinator>,
    observer: Arc<dyn ChainObserver>,
    m2s: TransferDirection,
    s2m: TransferDirection,
    /// S2S loop state, keyed by sibling name, surviving endpoint rebuilds
    s2s_states: HashMap<String, TransferLoopState>,
}

impl FanOut {
    pub fn new(
        config: Config,
        signer: Arc<AgentSigner>,
        collector: Arc<SignatureCollector>,
        registry: Arc<ErrorRegistry>,
        coordinator: Arc<dyn Coordinator>,
        observer: Arc<dyn ChainObserver>,
    ) -> Result<Self> {
        let m2s = build_direction(
            &config,
            "M2S",
            0,
            &config.mainnet,
            &config.mainnet.rpc_url,
            &config.schain,
            None,
            true,
            signer.clone(),
            collector.clone(),
            registry.clone(),
            coordinator.clone(),
        )?;
        let s2m = build_direction(
            &config,
            "S2M",
            0,
            &config.schain,
            &config.schain.rpc_url,
            &config.mainnet,
            None,
            false,
            signer.clone(),
            collector.clone(),
            registry.clone(),
            coordinator.clone(),
        )?;
        Ok(Self {
            config,
            signer,
            collector,
            registry,
            coordinator,
            observer,
            m2s,
            s2m,
            s2s_states: HashMap::new(),
        })
    }

    /// Runs one pass of every direction. M2S and S2M run concurrently;
    /// sibling directions follow, each against a freshly picked node URL.
    pub async fn run_once(&mut self) -> PassSummary {
        let mut summary = PassSummary {
            success: true,
            ..Default::default()
        };

        let (m2s_result, s2m_result) =
            tokio::join!(self.m2s.run_pass(), self.s2m.run_pass());
        match m2s_result {
            Ok(n) => summary.m2s_submitted = n,
            Err(_) => summary.success = false,
        }
        match s2m_result {
            Ok(n) => summary.s2m_submitted = n,
            Err(_) => summary.success = false,
        }

        let siblings = self.observer.list_sibling_chains();
        for (index, sibling) in siblings.iter().enumerate() {
            match self.run_sibling_pass(index, sibling).await {
                Ok(n) => summary.s2s_submitted += n,
                Err(e) => {
                    warn!(sibling = %sibling.name, error = %e, "S2S direction failed");
                    summary.failed_siblings += 1;
                    summary.success = false;
                }
            }
        }
        if summary.failed_siblings > 0 {
            info!(
                failed = summary.failed_siblings,
                total = siblings.len(),
                "partial S2S failure this pass"
            );
        }
        summary
    }

    /// Runs the fan-out forever at `interval`. Never returns under normal
    /// operation; transfer failures are recorded, not propagated.
    pub async fn run_forever(mut self, interval: Duration) -> Result<()> {
        loop {
            self.run_once().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn run_sibling_pass(
        &mut self,
        index: usize,
        sibling: &SiblingChainConfig,
    ) -> Result<u64> {
        let url = pick_url(&sibling.rpc_urls)
            .with_context(|| format!("sibling '{}' has no rpc_urls", sibling.name))?;

        let src_endpoint = ChainEndpointConfig {
            name: sibling.name.clone(),
            chain_id: sibling.chain_id,
            rpc_url: url.clone(),
            message_proxy_addr: sibling.message_proxy_addr.clone(),
        };
        let mut direction = build_direction(
            &self.config,
            "S2S",
            index,
            &src_endpoint,
            &url,
            &self.config.schain,
            Some(sibling.nodes.clone()),
            false,
            self.signer.clone(),
            self.collector.clone(),
            self.registry.clone(),
            self.coordinator.clone(),
        )?;
        direction.category = format!("loop-S2S-{}", sibling.name);
        direction.state = self
            .s2s_states
            .remove(&sibling.name)
            .unwrap_or_default();

        let result = direction.run_pass().await;
        self.s2s_states
            .insert(sibling.name.clone(), direction.state.clone());
        Ok(result?)
    }
}

fn pick_url(urls: &[String]) -> Option<String> {
    if urls.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..urls.len());
    Some(urls[index].clone())
}

/// Builds one transfer direction. The destination decides the gas policy;
/// the security checks apply only when the source is mainnet.
#[allow(clippy::too_many_arguments)]
fn build_direction(
    config: &Config,
    direction: &'static str,
    index: usize,
    src: &ChainEndpointConfig,
    src_url: &str,
    dst: &ChainEndpointConfig,
    roster: Option<Vec<crate::config::NodeConfig>>,
    mainnet_source: bool,
    signer: Arc<AgentSigner>,
    collector: Arc<SignatureCollector>,
    registry: Arc<ErrorRegistry>,
    coordinator: Arc<dyn Coordinator>,
) -> Result<TransferDirection> {
    let attempts = config.transfer.rpc_attempts;
    let src_client = RpcClient::new(src_url, attempts)
        .with_context(|| format!("Failed to create RPC client for {}", src.name))?;
    let dst_client = RpcClient::new(&dst.rpc_url, attempts)
        .with_context(|| format!("Failed to create RPC client for {}", dst.name))?;

    let dst_is_mainnet = dst.name == config.mainnet.name;
    let policy = if dst_is_mainnet {
        GasPolicy::mainnet(&config.gas)
    } else {
        GasPolicy::schain(&config.gas)
    };

    let transfer = &config.transfer;
    let options = TransferOptions {
        transactions_per_block: transfer.transactions_per_block,
        transfer_steps: transfer.transfer_steps,
        max_transactions_count: transfer.max_transactions_count,
        block_await_depth: if mainnet_source { transfer.block_await_depth } else { 0 },
        block_age_sec: if mainnet_source { transfer.block_age_sec } else { 0 },
        sleep_between_tx_ms: transfer.sleep_between_tx_ms,
        wait_for_next_block: transfer.wait_for_next_block,
        sleep_before_fetch_ms: transfer.sleep_before_fetch_ms,
        time_budget: match transfer.time_framing_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
        scan: ScanOptions::from_config(transfer),
    };

    Ok(TransferDirection {
        direction,
        index,
        category: format!("loop-{direction}"),
        src: MessageProxy::new(src_client, &src.message_proxy_addr),
        src_name: src.name.clone(),
        dst: MessageProxy::new(dst_client, &dst.message_proxy_addr),
        dst_name: dst.name.clone(),
        dst_address: dst
            .message_proxy_addr
            .parse()
            .with_context(|| format!("invalid proxy address for {}", dst.name))?,
        dst_chain_id: dst.chain_id,
        dst_is_mainnet,
        roster,
        signer,
        collector,
        policy,
        options,
        registry,
        coordinator,
        pow: config.pow.clone(),
        state: TransferLoopState::default(),
    })
}
