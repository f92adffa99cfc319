//! Swap lifecycle - the state machine shared by every provider
//!
//! `Quoted -> Created -> Submitted -> [AwaitingFill -> SecretsReleased] -> Settling -> Terminal`
//!
//! The bracketed states only occur for escrow backends. Any live state can end in
//! `Terminal(Failed)`; the manager records every transition in the `SwapReport`.

pub mod manager;
pub mod registry;
pub mod state;

pub use manager::{OrderLifecycleManager, OrderReference};
pub use registry::{InFlightSwap, SwapRegistry};
pub use state::{OrderState, SwapOutcome, SwapReport};
