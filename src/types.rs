//! Swap intents, quotes, orders and the normalized status taxonomy

use crate::error::{SwapError, SwapResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Backend a swap is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OneClick,
    FusionPlus,
    SquidRouter,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OneClick => "one_click",
            ProviderKind::FusionPlus => "fusion_plus",
            ProviderKind::SquidRouter => "squid_router",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "one_click" | "oneclick" | "near" => Ok(ProviderKind::OneClick),
            "fusion_plus" | "fusionplus" | "oneinch" | "1inch" => Ok(ProviderKind::FusionPlus),
            "squid_router" | "squidrouter" | "squid" => Ok(ProviderKind::SquidRouter),
            other => Err(SwapError::InvalidRequest(format!("Unknown provider: {}", other))),
        }
    }
}

/// An asset as seen by a provider plus its on-chain representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Provider-facing identifier (asset id, token address, ...)
    pub id: String,
    /// Token contract on the asset's chain; `None` for the chain's native asset
    pub token: Option<String>,
}

impl Asset {
    pub fn native(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: None,
        }
    }

    pub fn token(id: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: Some(contract.into()),
        }
    }

    pub fn is_native(&self) -> bool {
        self.token.is_none()
    }
}

/// A request to move value from one chain/asset to another. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub id: Uuid,
    pub origin_chain: String,
    pub origin_asset: Asset,
    pub destination_chain: String,
    pub destination_asset: Asset,
    /// Amount in the origin asset's smallest unit
    pub amount: String,
    pub sender_address: String,
    pub recipient_address: String,
}

impl SwapIntent {
    /// Create a new intent, validating the amount
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        origin_chain: impl Into<String>,
        origin_asset: Asset,
        destination_chain: impl Into<String>,
        destination_asset: Asset,
        amount: impl Into<String>,
        sender_address: impl Into<String>,
        recipient_address: impl Into<String>,
    ) -> SwapResult<Self> {
        let intent = Self {
            id: Uuid::new_v4(),
            origin_chain: origin_chain.into(),
            origin_asset,
            destination_chain: destination_chain.into(),
            destination_asset,
            amount: amount.into(),
            sender_address: sender_address.into(),
            recipient_address: recipient_address.into(),
        };
        intent.amount_value()?;
        Ok(intent)
    }

    /// Parsed amount in smallest units
    pub fn amount_value(&self) -> SwapResult<u128> {
        parse_amount(&self.amount)
    }
}

/// Parse an integer amount string in smallest units
pub fn parse_amount(amount: &str) -> SwapResult<u128> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SwapError::InvalidAmount(format!(
            "{:?} is not an integer amount in smallest units",
            amount
        )));
    }
    let value: u128 = trimmed
        .parse()
        .map_err(|e| SwapError::InvalidAmount(format!("{:?}: {}", amount, e)))?;
    if value == 0 {
        return Err(SwapError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(value)
}

/// Where the funds for a quote have to go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Settlement {
    /// Send funds to a one-time provider address
    DepositAddress { address: String, memo: Option<String> },
    /// Execute a prepared transaction on the origin chain
    Route {
        request_id: String,
        quote_id: Option<String>,
        route: serde_json::Value,
    },
    /// Sign an escrow order; resolvers fill it against a hash lock
    Escrow { quote_id: String },
    /// Dry quote: nothing reservable was created
    Estimate,
}

/// A time-bounded price for an intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    pub provider: ProviderKind,
    pub intent: SwapIntent,
    pub estimated_output: String,
    pub settlement: Settlement,
    pub expiry: DateTime<Utc>,
    /// Raw provider response, kept for order construction and diagnostics
    pub provider_metadata: serde_json::Value,
}

impl Quote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Reject a quote whose expiry has passed
    pub fn ensure_fresh(&self) -> SwapResult<()> {
        if self.is_expired_at(Utc::now()) {
            return Err(SwapError::QuoteExpired {
                quote_id: self.id.clone(),
                expiry: self.expiry.to_rfc3339(),
            });
        }
        Ok(())
    }

    pub fn deposit_address(&self) -> Option<&str> {
        match &self.settlement {
            Settlement::DepositAddress { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// Shared status taxonomy every backend status is normalized to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Waiting for funds or for the order to be picked up
    Pending,
    /// Funds observed, settlement in progress
    Processing,
    Success,
    PartialSuccess,
    NeedsGas,
    Expired,
    Refunded,
    Failed,
    NotFound,
}

impl StatusKind {
    /// Whether no further transition is expected without intervention
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusKind::Pending | StatusKind::Processing)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Pending => "pending",
            StatusKind::Processing => "processing",
            StatusKind::Success => "success",
            StatusKind::PartialSuccess => "partial_success",
            StatusKind::NeedsGas => "needs_gas",
            StatusKind::Expired => "expired",
            StatusKind::Refunded => "refunded",
            StatusKind::Failed => "failed",
            StatusKind::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// A point-in-time backend status, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedStatus {
    pub kind: StatusKind,
    /// Status string exactly as the backend reported it
    pub raw: String,
    pub detail: Option<serde_json::Value>,
}

impl NormalizedStatus {
    pub fn new(kind: StatusKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A provider order created from a quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Provider order identity (deposit address, order hash, or request id)
    pub order_id: String,
    pub provider: ProviderKind,
    pub status: Option<NormalizedStatus>,
    pub created_at: DateTime<Utc>,
    pub quote: Quote,
    /// Provider payload needed for submission (e.g. a signed escrow order)
    pub payload: serde_json::Value,
    /// Origin-chain transaction that moved the funds, once known
    pub transaction_id: Option<String>,
}

impl Order {
    pub fn new(order_id: impl Into<String>, quote: Quote, payload: serde_json::Value) -> Self {
        Self {
            order_id: order_id.into(),
            provider: quote.provider,
            status: None,
            created_at: Utc::now(),
            quote,
            payload,
            transaction_id: None,
        }
    }
}

/// Chain transaction result returned by the signers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub transaction_id: String,
    pub explorer_reference: String,
}

/// What a backend reported when an order was handed over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub order_id: String,
    /// Funds-moving transaction, when submission moved funds
    pub transaction: Option<TxResult>,
    pub response: serde_json::Value,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn xrpl_to_base_intent(amount: &str) -> SwapIntent {
        SwapIntent::new(
            "xrpl",
            Asset::native("nep141:xrp.omft.near"),
            "base",
            Asset::token(
                "nep141:base-0x833589fcd6edb6e08f4c7c32d4f71b54bda02913.omft.near",
                "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
            ),
            amount,
            "rSenderAccount",
            "0x1111111111111111111111111111111111111111",
        )
        .unwrap()
    }

    pub fn quote_for(intent: &SwapIntent, provider: ProviderKind, settlement: Settlement) -> Quote {
        Quote {
            id: format!("quote-{}", intent.id),
            provider,
            intent: intent.clone(),
            estimated_output: "1000".to_string(),
            settlement,
            expiry: Utc::now() + chrono::Duration::minutes(3),
            provider_metadata: serde_json::json!({}),
        }
    }
}
