//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the relay
//! agent. Configuration covers chain endpoints, signer backends, the BLS
//! signature collection service, transfer tuning options and the optional
//! proof-of-work sidecar.
//!
//! Secrets are never stored in the configuration file. The file names the
//! environment variables that hold them and the values are read from the
//! environment at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root chain ("mainnet") endpoint and proxy address
    pub mainnet: ChainEndpointConfig,
    /// Own application chain ("S-chain") endpoint and proxy address
    pub schain: ChainEndpointConfig,
    /// Sibling S-chains used as sources for S2S transfers. Usually supplied
    /// by an external observer; this static list is a fallback and the test
    /// configuration path.
    #[serde(default)]
    pub siblings: Vec<SiblingChainConfig>,
    /// Signer backend selection
    pub signer: SignerConfig,
    /// BLS signature collection service
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Transfer engine tuning options
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Gas price / gas limit policy options
    #[serde(default)]
    pub gas: GasConfig,
    /// Optional proof-of-work sidecar for S-chain free-gas submission
    #[serde(default)]
    pub pow: Option<PowConfig>,
}

/// Identity of one chain endpoint. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEndpointConfig {
    /// Human-readable chain name, also the name registered on the proxies
    pub name: String,
    /// Unique chain identifier
    pub chain_id: u64,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Address of the message proxy contract on this chain
    pub message_proxy_addr: String,
}

/// A sibling S-chain reachable as an S2S source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiblingChainConfig {
    /// Chain name as registered on the proxies
    pub name: String,
    /// Unique chain identifier
    pub chain_id: u64,
    /// Candidate JSON-RPC endpoint URLs; one is picked per pass
    pub rpc_urls: Vec<String>,
    /// Address of the message proxy contract on the sibling chain
    pub message_proxy_addr: String,
    /// Node roster used by the S2S cross-node verifier
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// One node of an S-chain roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub url: String,
}

/// Signer backend selection. Exactly one of `local`, `hsm` or `queue` must
/// be configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Local private key backend
    #[serde(default)]
    pub local: Option<LocalKeyConfig>,
    /// Remote HSM backend
    #[serde(default)]
    pub hsm: Option<HsmConfig>,
    /// Transaction-manager queue backend
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    /// Optional separate key for S2S source traffic. By default the same
    /// agent key serves all directions; this surfaces the choice instead of
    /// hard-wiring it.
    #[serde(default)]
    pub s2s_key_env: Option<String>,
}

/// Local private key backend. The key is an unprefixed or 0x-prefixed hex
/// secp256k1 scalar read from the named environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalKeyConfig {
    /// Environment variable name containing the private key
    /// Default: "IMA_AGENT_PRIVATE_KEY"
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

/// Remote HSM backend signing transaction hashes over a TLS-authenticated
/// JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsmConfig {
    /// HSM JSON-RPC URL
    pub url: String,
    /// Name of the ECDSA key inside the HSM
    pub key_name: String,
    /// Address the HSM key corresponds to (the agent cannot derive it)
    pub address: String,
    /// Optional client TLS certificate path (PEM)
    #[serde(default)]
    pub tls_cert_path: Option<String>,
    /// Optional client TLS key path (PEM)
    #[serde(default)]
    pub tls_key_path: Option<String>,
}

/// Transaction-manager queue backend. The queue signs and submits on our
/// behalf; the agent polls for a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue manager base URL
    pub url: String,
    /// Address the queue's key corresponds to
    pub address: String,
    /// Queue priority, folded into the ordering score
    #[serde(default = "default_queue_priority")]
    pub priority: u32,
    /// Upper bound on the wait for a terminal status, in seconds
    /// Default: 36000 (10 hours)
    #[serde(default = "default_queue_wait_sec")]
    pub max_wait_sec: u64,
}

/// BLS signature collection service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Signing service URL. When absent the stub collector is used, which is
    /// only permitted together with `test_mode`.
    #[serde(default)]
    pub url: Option<String>,
    /// Allow the all-zero stub signature. Test configurations only.
    #[serde(default)]
    pub test_mode: bool,
    /// Request timeout in milliseconds
    #[serde(default = "default_collector_timeout_ms")]
    pub timeout_ms: u64,
}

/// Transfer engine tuning options with their process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum messages per submitted batch
    #[serde(default = "default_transactions_per_block")]
    pub transactions_per_block: u64,
    /// Maximum batches per pass (None = unbounded)
    #[serde(default)]
    pub transfer_steps: Option<u64>,
    /// Maximum messages per pass (None = unbounded)
    #[serde(default)]
    pub max_transactions_count: Option<u64>,
    /// Required burial depth of a message block under the chain head before
    /// it is relayed. Applies to mainnet-source directions.
    #[serde(default)]
    pub block_await_depth: u64,
    /// Required age of a message block in seconds before it is relayed
    #[serde(default)]
    pub block_age_sec: u64,
    /// Sleep between submissions when the destination is an S-chain
    #[serde(default)]
    pub sleep_between_tx_ms: u64,
    /// Wait for a fresh block between submissions on S-chain destinations
    #[serde(default)]
    pub wait_for_next_block: bool,
    /// Use the progressive widening scan for unbounded ranges
    #[serde(default = "default_true")]
    pub progressive_scan: bool,
    /// Window size of the iterative scan, in blocks
    #[serde(default = "default_blocks_in_iterative_step")]
    pub blocks_in_iterative_step: u64,
    /// Maximum number of iterative windows before falling back to a single
    /// full-range query
    #[serde(default = "default_max_iterations_in_all_range")]
    pub max_iterations_in_all_range: u64,
    /// Pause before fetching outgoing message events
    #[serde(default = "default_sleep_before_fetch_ms")]
    pub sleep_before_fetch_ms: u64,
    /// Wall-clock budget for one pass, in milliseconds (0 = unbounded)
    #[serde(default)]
    pub time_framing_ms: u64,
    /// Attempts for each RPC operation before giving up
    #[serde(default = "default_rpc_attempts")]
    pub rpc_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        // serde(default) on the containing struct bypasses field defaults,
        // so route through an empty table.
        toml::from_str("").expect("empty transfer config must deserialize")
    }
}

/// Gas policy options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Gas price multiplier for mainnet submissions
    #[serde(default = "default_price_multiplier_mainnet")]
    pub price_multiplier_mainnet: f64,
    /// Gas price multiplier for S-chain submissions
    #[serde(default = "default_price_multiplier_schain")]
    pub price_multiplier_schain: f64,
    /// Gas limit multiplier applied on top of the node estimate
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
    /// Ceiling for the effective gas price, in wei
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u128,
}

impl Default for GasConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty gas config must deserialize")
    }
}

/// External proof-of-work helper computing a gas price that satisfies an
/// S-chain's free-gas policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowConfig {
    /// Path to the helper executable
    pub program: String,
    /// Execution budget in milliseconds
    #[serde(default = "default_pow_budget_ms")]
    pub budget_ms: u64,
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_private_key_env() -> String {
    "IMA_AGENT_PRIVATE_KEY".to_string()
}

fn default_queue_priority() -> u32 {
    5
}

fn default_queue_wait_sec() -> u64 {
    36_000
}

fn default_collector_timeout_ms() -> u64 {
    30_000
}

fn default_transactions_per_block() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_blocks_in_iterative_step() -> u64 {
    1_000
}

fn default_max_iterations_in_all_range() -> u64 {
    5_000
}

fn default_sleep_before_fetch_ms() -> u64 {
    5_000
}

fn default_rpc_attempts() -> u32 {
    3
}

fn default_price_multiplier_mainnet() -> f64 {
    1.25
}

fn default_price_multiplier_schain() -> f64 {
    1.0
}

fn default_gas_multiplier() -> f64 {
    1.2
}

fn default_max_gas_price() -> u128 {
    200_000_000_000
}

fn default_pow_budget_ms() -> u64 {
    60_000
}

// ============================================================================
// LOADING AND VALIDATION
// ============================================================================

impl Config {
    /// Loads the configuration from the TOML file named by the
    /// `IMA_AGENT_CONFIG_PATH` environment variable, falling back to
    /// `config/ima-agent.toml`.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Parsed and validated configuration
    /// * `Err(anyhow::Error)` - Missing file, parse error or invalid content
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("IMA_AGENT_CONFIG_PATH")
            .unwrap_or_else(|_| "config/ima-agent.toml".to_string());

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Configuration file '{config_path}' not found"))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {config_path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        let backends = [
            self.signer.local.is_some(),
            self.signer.hsm.is_some(),
            self.signer.queue.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if backends != 1 {
            anyhow::bail!("exactly one signer backend must be configured, found {backends}");
        }

        if self.collector.url.is_none() && !self.collector.test_mode {
            anyhow::bail!(
                "no signature collection service configured; set collector.url \
                 (or collector.test_mode for the all-zero stub)"
            );
        }

        if self.mainnet.name == self.schain.name {
            anyhow::bail!("mainnet and schain must have distinct names");
        }

        for sibling in &self.siblings {
            if sibling.rpc_urls.is_empty() {
                anyhow::bail!("sibling chain '{}' has no rpc_urls", sibling.name);
            }
        }

        if self.transfer.transactions_per_block == 0 {
            anyhow::bail!("transfer.transactions_per_block must be at least 1");
        }
        if self.transfer.rpc_attempts == 0 {
            anyhow::bail!("transfer.rpc_attempts must be at least 1");
        }

        Ok(())
    }
}

impl LocalKeyConfig {
    /// Reads the private key from the configured environment variable.
    pub fn get_private_key(&self) -> Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the agent's \
                 hex-encoded secp256k1 private key.",
                self.private_key_env
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [mainnet]
            name = "Mainnet"
            chain_id = 1
            rpc_url = "http://127.0.0.1:8545"
            message_proxy_addr = "0x68898db1012808808c903f390909c52d9f706749"

            [schain]
            name = "Bob"
            chain_id = 1_482_601_649
            rpc_url = "http://127.0.0.1:15000"
            message_proxy_addr = "0xd2aaa00100000000000000000000000000000000"

            [signer.local]

            [collector]
            test_mode = true
        "#
    }

    /// What is tested: a minimal configuration parses and every tuning option
    /// receives its documented default
    /// Why: the defaults are part of the external contract of the agent
    #[test]
    fn defaults_are_applied() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.transfer.transactions_per_block, 5);
        assert_eq!(config.transfer.transfer_steps, None);
        assert_eq!(config.transfer.max_transactions_count, None);
        assert_eq!(config.transfer.block_await_depth, 0);
        assert_eq!(config.transfer.block_age_sec, 0);
        assert_eq!(config.transfer.sleep_between_tx_ms, 0);
        assert!(!config.transfer.wait_for_next_block);
        assert!(config.transfer.progressive_scan);
        assert_eq!(config.transfer.blocks_in_iterative_step, 1_000);
        assert_eq!(config.transfer.max_iterations_in_all_range, 5_000);
        assert_eq!(config.transfer.sleep_before_fetch_ms, 5_000);
        assert_eq!(config.gas.price_multiplier_mainnet, 1.25);
        assert_eq!(config.gas.price_multiplier_schain, 1.0);
        assert_eq!(config.gas.max_gas_price, 200_000_000_000);
        assert_eq!(
            config.signer.local.unwrap().private_key_env,
            "IMA_AGENT_PRIVATE_KEY"
        );
    }

    /// What is tested: configurations with zero or two signer backends are
    /// rejected
    /// Why: the call pipeline dispatches on exactly one backend capability
    #[test]
    fn signer_backend_must_be_unique() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.signer.queue = Some(QueueConfig {
            url: "http://127.0.0.1:3000".to_string(),
            address: "0x0000000000000000000000000000000000000001".to_string(),
            priority: 5,
            max_wait_sec: 10,
        });
        assert!(config.validate().is_err());

        config.signer.queue = None;
        config.signer.local = None;
        assert!(config.validate().is_err());
    }

    /// What is tested: a missing collector URL is rejected unless test mode
    /// is explicitly enabled
    /// Why: the all-zero stub signature must never reach production
    #[test]
    fn stub_collector_requires_test_mode() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.collector.test_mode = false;
        assert!(config.validate().is_err());

        config.collector.url = Some("http://127.0.0.1:1026".to_string());
        config.validate().unwrap();
    }
}
