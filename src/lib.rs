//! Swap Orchestrator - cross-chain swaps across heterogeneous settlement backends
//!
//! One intent ("move X of asset A on chain 1 to asset B on chain 2") is quoted,
//! ordered, submitted and tracked to a terminal state through one of three
//! backend styles:
//!
//! - deposit address (1Click): fund a quoted address on the origin chain
//! - hash-lock escrow (Fusion+): sign an order, then release secrets per fill
//! - route aggregator (Squid): execute a prepared contract call
//!
//! `OrderLifecycleManager` drives every swap through the same state machine;
//! provider specifics live behind `ProviderAdapter`.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod poller;
pub mod providers;
pub mod secrets;
pub mod types;

pub use chain::ChainSigner;
pub use config::{KeyMaterial, Settings};
pub use error::{ErrorKind, SwapError, SwapResult};
pub use lifecycle::{OrderLifecycleManager, OrderReference, OrderState, SwapOutcome, SwapReport};
pub use poller::{PollPolicy, StatusPoller};
pub use providers::ProviderAdapter;
pub use secrets::{Secret, SecretSet, SecretVault};
pub use types::{Asset, NormalizedStatus, ProviderKind, Quote, StatusKind, SwapIntent};
