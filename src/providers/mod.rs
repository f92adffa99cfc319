//! Provider adapters - translate intents into backend quotes, orders and statuses
//!
//! Each backend settles differently:
//! - `OneClickAdapter`: quote returns a one-time deposit address, funds are sent there
//! - `FusionPlusAdapter`: a signed hash-lock escrow order, unlocked by releasing secrets
//! - `SquidRouterAdapter`: a prepared route transaction executed on the origin chain
//!
//! All three implement `ProviderAdapter`, so the lifecycle state machine is written once.

pub mod fusion;
pub mod http;
pub mod one_click;
pub mod squid;

pub use fusion::FusionPlusAdapter;
pub use one_click::OneClickAdapter;
pub use squid::SquidRouterAdapter;

use crate::config::MinimumAmount;
use crate::error::{SwapError, SwapResult};
use crate::poller::{PollPolicy, TerminalSet};
use crate::secrets::{Secret, SecretSet};
use crate::types::{NormalizedStatus, Order, ProviderKind, Quote, SubmissionResult, SwapIntent};

use async_trait::async_trait;

/// Native asset placeholder used by EVM routing backends
pub const NATIVE_TOKEN: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// An order plus the secrets its caller now solely holds
#[derive(Debug)]
pub struct CreatedOrder {
    pub order: Order,
    /// Escrow backends only
    pub secrets: Option<SecretSet>,
}

impl CreatedOrder {
    pub fn without_secrets(order: Order) -> Self {
        Self {
            order,
            secrets: None,
        }
    }
}

/// Per-backend translation of quote, order and status
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Fail with `SigningUnavailable` when the key this backend's orders need is not
    /// configured. Checked before any quote is requested.
    fn ensure_signer(&self, intent: &SwapIntent) -> SwapResult<()>;

    /// Price an intent. `dry` must not reserve anything on the backend.
    async fn get_quote(&self, intent: &SwapIntent, dry: bool) -> SwapResult<Quote>;

    /// Turn a quote into an order; `preset` selects an escrow auction preset
    async fn create_order(
        &self,
        quote: &Quote,
        wallet: &str,
        preset: Option<String>,
    ) -> SwapResult<CreatedOrder>;

    /// Hand the order to the backend, moving funds where the model requires it
    async fn submit_order(&self, order: &Order) -> SwapResult<SubmissionResult>;

    /// One point-in-time status read
    async fn get_status(&self, order: &Order) -> SwapResult<NormalizedStatus>;

    /// Fill indices whose escrows are ready to receive their secret
    async fn ready_fills(&self, _order: &Order) -> SwapResult<Vec<usize>> {
        Err(self.unsupported("ready_fills"))
    }

    async fn submit_secret(&self, _order: &Order, _secret: &Secret) -> SwapResult<()> {
        Err(self.unsupported("submit_secret"))
    }

    /// Whether orders are unlocked by releasing secrets
    fn uses_secrets(&self) -> bool {
        false
    }

    /// Statuses after which settlement polling stops
    fn terminal_set(&self) -> TerminalSet;

    /// Settlement polling policy derived from the engine default
    fn poll_policy(&self, base: PollPolicy) -> PollPolicy {
        base
    }

    fn unsupported(&self, operation: &str) -> SwapError {
        SwapError::Unsupported {
            operation: operation.to_string(),
            provider: self.kind().to_string(),
        }
    }
}

/// Reject an intent below the configured minimum for its origin (chain, asset)
pub fn check_minimum(minimums: &[MinimumAmount], intent: &SwapIntent) -> SwapResult<()> {
    let amount = intent.amount_value()?;
    let rule = minimums
        .iter()
        .find(|m| m.chain == intent.origin_chain && m.asset == intent.origin_asset.id);

    match rule {
        Some(min) if amount < min.amount => Err(SwapError::BelowMinimum {
            asset: intent.origin_asset.id.clone(),
            amount: intent.amount.clone(),
            minimum: min.amount,
        }),
        _ => Ok(()),
    }
}

/// Token address for an EVM asset, the native placeholder when absent
pub fn evm_token(asset: &crate::types::Asset) -> String {
    asset
        .token
        .clone()
        .unwrap_or_else(|| NATIVE_TOKEN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::fixtures;

    fn xrp_minimum() -> Vec<MinimumAmount> {
        vec![MinimumAmount {
            chain: "xrpl".to_string(),
            asset: "nep141:xrp.omft.near".to_string(),
            amount: 2_000_000,
        }]
    }

    #[test]
    fn test_minimum_boundary() {
        assert!(check_minimum(&xrp_minimum(), &fixtures::xrpl_to_base_intent("2000000")).is_ok());

        let err = check_minimum(&xrp_minimum(), &fixtures::xrpl_to_base_intent("1999999"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn test_minimum_only_applies_to_matching_pair() {
        assert!(check_minimum(&[], &fixtures::xrpl_to_base_intent("1")).is_ok());
    }

    #[test]
    fn test_native_placeholder() {
        let intent = fixtures::xrpl_to_base_intent("2000000");
        assert_eq!(evm_token(&intent.origin_asset), NATIVE_TOKEN);
        assert_eq!(
            evm_token(&intent.destination_asset),
            "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
        );
    }
}
