//! IMA Agent
//!
//! Off-chain relay agent moving cross-chain messages between a root chain
//! and sibling application chains. The agent:
//! 1. Reads outgoing/incoming message counters on both proxies
//! 2. Scans the source chain for the missing outgoing messages
//! 3. Verifies S2S messages against the source chain's node roster
//! 4. Collects a threshold-BLS aggregate over each batch
//! 5. Submits signed batches to the destination proxy
//!
//! Counters are re-read from the chains on every pass; the agent keeps no
//! on-disk state. RPC failures never terminate the process - only startup
//! misconfiguration does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use ima_agent::{
    AgentSigner, Config, ErrorRegistry, FanOut, LocalCoordinator, RpcClient, SignatureCollector,
    StaticObserver,
};

/// Pause between fan-out passes.
const PASS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting IMA Agent");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("IMA Agent");
        println!();
        println!("Usage: ima-agent [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  IMA_AGENT_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }
    if let Some(path) = config_path {
        if std::env::var("IMA_AGENT_CONFIG_PATH").is_err() {
            std::env::set_var("IMA_AGENT_CONFIG_PATH", &path);
        }
        info!("Using custom config: {}", path);
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    // Fail fast on unreachable endpoints: the running loops tolerate
    // outages, but starting against a dead endpoint is a misconfiguration.
    for endpoint in [&config.mainnet, &config.schain] {
        let client = RpcClient::new(&endpoint.rpc_url, config.transfer.rpc_attempts)
            .with_context(|| format!("Failed to create RPC client for {}", endpoint.name))?;
        if !client.probe_online().await {
            anyhow::bail!(
                "endpoint '{}' at {} is unreachable",
                endpoint.name,
                endpoint.rpc_url
            );
        }
    }
    info!("Chain endpoints reachable");

    let signer = Arc::new(AgentSigner::from_config(&config.signer)?);
    info!(address = %signer.address(), "Signer initialized");

    let collector = Arc::new(SignatureCollector::from_config(&config.collector)?);
    let registry = ErrorRegistry::new(ima_agent::registry::DEFAULT_RECENT_FAILURES_CAP);
    let coordinator = Arc::new(LocalCoordinator::default());
    let observer = Arc::new(StaticObserver::new(config.siblings.clone()));

    let fanout = FanOut::new(
        config,
        signer,
        collector,
        registry,
        coordinator,
        observer,
    )?;

    info!("All components initialized, starting transfer loops");
    fanout.run_forever(PASS_INTERVAL).await
}
