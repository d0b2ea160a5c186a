//! IMA Agent Library
//!
//! This crate provides the transfer engine of the off-chain relay agent that
//! moves cross-chain messages between a trusted root chain ("mainnet") and
//! sibling application chains ("S-chains"), and between pairs of S-chains.
//! It watches message proxy events on the source chain, forms contiguous
//! message batches, obtains a threshold-BLS aggregate over each batch and
//! submits it to the destination proxy.

pub mod collector;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gas;
pub mod proxy;
pub mod registry;
pub mod rpc;
pub mod scanner;
pub mod signer;
pub mod transfer;
pub mod tx;
pub mod verifier;

// Re-export commonly used types
pub use collector::SignatureCollector;
pub use config::{ChainEndpointConfig, Config, NodeConfig, SiblingChainConfig};
pub use error::{AgentError, AgentResult};
pub use fanout::{ChainObserver, FanOut, LocalCoordinator, PassSummary, StaticObserver};
pub use gas::GasPolicy;
pub use proxy::{batch_hash, chain_hash, BlsSignature, Message, MessageProxy};
pub use registry::{ErrorRegistry, FailureRecord, TransferEvent};
pub use rpc::RpcClient;
pub use signer::AgentSigner;
pub use transfer::{Coordinator, TransferDirection, TransferLoopState, TransferOptions};
