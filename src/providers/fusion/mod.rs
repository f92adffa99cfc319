//! Fusion+ hash-lock escrow backend
//!
//! The maker signs a cross-chain limit order committing to a hash lock. Resolvers fill
//! it by locking funds in escrows on both chains; the maker then releases one secret
//! per ready fill, which lets the resolver unlock the source escrow and the recipient
//! receive on the destination chain.

pub mod client;
pub mod order;

pub use client::FusionHttp;
pub use order::{LimitOrder, TimeLocks};

use super::{check_minimum, evm_token, CreatedOrder, ProviderAdapter};
use crate::chain::{ChainFamily, ChainSigner};
use crate::config::FusionPlusConfig;
use crate::error::{SwapError, SwapResult};
use crate::poller::{PollPolicy, TerminalSet};
use crate::secrets::{Secret, SecretVault};
use crate::types::{
    NormalizedStatus, Order, ProviderKind, Quote, Settlement, StatusKind, SubmissionResult,
    SwapIntent,
};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const SERVICE: &str = "fusion_plus";

/// Preset names the quoter may return
pub const PRESET_NAMES: [&str; 4] = ["fast", "medium", "slow", "custom"];

/// Dutch auction preset offered with a quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub secrets_count: usize,
    pub auction_duration: u64,
    #[serde(default)]
    pub start_amount: Option<String>,
    #[serde(default)]
    pub auction_end_amount: Option<String>,
    #[serde(default)]
    pub allow_partial_fills: bool,
    #[serde(default)]
    pub allow_multiple_fills: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionQuote {
    #[serde(default)]
    pub quote_id: Option<String>,
    pub src_token_amount: String,
    pub dst_token_amount: String,
    #[serde(default)]
    pub presets: BTreeMap<String, Option<Preset>>,
    #[serde(default)]
    pub recommended_preset: Option<String>,
    #[serde(default)]
    pub src_escrow_factory: Option<String>,
    #[serde(default)]
    pub dst_escrow_factory: Option<String>,
    #[serde(default)]
    pub src_safety_deposit: Option<String>,
    #[serde(default)]
    pub dst_safety_deposit: Option<String>,
    #[serde(default)]
    pub time_locks: Option<TimeLocks>,
}

impl FusionQuote {
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name).and_then(Option::as_ref)
    }
}

/// Pick the requested preset, falling back to the quoter's recommendation
pub fn select_preset(quote: &FusionQuote, requested: Option<&str>) -> SwapResult<(String, Preset)> {
    let name = match requested {
        Some(name) => {
            if !PRESET_NAMES.contains(&name) {
                return Err(SwapError::InvalidRequest(format!(
                    "unknown preset {}, expected one of {:?}",
                    name, PRESET_NAMES
                )));
            }
            name.to_string()
        }
        None => quote
            .recommended_preset
            .clone()
            .ok_or_else(|| SwapError::upstream(SERVICE, "quote has no recommended preset"))?,
    };

    let preset = quote
        .preset(&name)
        .cloned()
        .ok_or_else(|| SwapError::InvalidRequest(format!("quote has no {} preset", name)))?;
    Ok((name, preset))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionQuoteParams {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: String,
    pub dst_token: String,
    pub amount: String,
    pub wallet_address: String,
}

/// Everything needed to build and sign one escrow order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderParams {
    pub wallet_address: String,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: String,
    pub dst_token: String,
    pub amount: String,
    pub preset: String,
    pub source: String,
    pub hash_lock: String,
    pub secret_hashes: Vec<String>,
}

/// A signed order ready for relayer submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedOrder {
    pub hash: String,
    pub quote_id: String,
    pub src_chain_id: u64,
    pub order: LimitOrder,
    pub extension: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyFill {
    pub idx: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOrderStatus {
    pub status: String,
    #[serde(default)]
    pub fills: Vec<Value>,
}

impl FusionOrderStatus {
    pub fn not_found() -> Self {
        Self {
            status: "not_found".to_string(),
            fills: Vec::new(),
        }
    }
}

/// Map a Fusion+ order status onto the shared taxonomy
pub fn normalize_status(raw: &str) -> StatusKind {
    match raw {
        "pending" => StatusKind::Pending,
        "executed" => StatusKind::Success,
        "expired" => StatusKind::Expired,
        "refunded" => StatusKind::Refunded,
        "cancelled" => StatusKind::Failed,
        "refunding" => StatusKind::Processing,
        "not_found" => StatusKind::NotFound,
        _ => StatusKind::Processing,
    }
}

/// Fusion+ quoter, relayer and orders operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FusionApi: Send + Sync {
    /// Address orders are signed for, if a wallet is configured
    fn maker_address(&self) -> Option<String>;

    async fn quote(&self, params: &FusionQuoteParams) -> SwapResult<FusionQuote>;

    /// Build and sign an order for `quote`
    async fn create_order(&self, quote: &FusionQuote, params: &OrderParams)
        -> SwapResult<PreparedOrder>;

    async fn submit_order(
        &self,
        src_chain_id: u64,
        order: &PreparedOrder,
        quote_id: &str,
        secret_hashes: &[String],
    ) -> SwapResult<Value>;

    async fn ready_fills(&self, order_hash: &str) -> SwapResult<Vec<ReadyFill>>;

    async fn submit_secret(&self, order_hash: &str, secret: &str) -> SwapResult<()>;

    async fn order_status(&self, order_hash: &str) -> SwapResult<FusionOrderStatus>;
}

/// Quote context carried from `get_quote` to `create_order`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FusionQuoteMeta {
    src_chain_id: u64,
    dst_chain_id: u64,
    src_token: String,
    dst_token: String,
    quote: FusionQuote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    prepared: PreparedOrder,
    secret_hashes: Vec<String>,
    preset: String,
}

fn payload_of(order: &Order) -> SwapResult<OrderPayload> {
    serde_json::from_value(order.payload.clone()).map_err(|e| {
        SwapError::InvalidRequest(format!("order {} has no signed escrow order: {}", order.order_id, e))
    })
}

/// Escrow settlement through Fusion+
pub struct FusionPlusAdapter {
    api: Arc<dyn FusionApi>,
    signer: Arc<ChainSigner>,
    config: FusionPlusConfig,
}

impl FusionPlusAdapter {
    pub fn new(api: Arc<dyn FusionApi>, signer: Arc<ChainSigner>, config: FusionPlusConfig) -> Self {
        Self {
            api,
            signer,
            config,
        }
    }
}

#[async_trait]
impl ProviderAdapter for FusionPlusAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::FusionPlus
    }

    fn ensure_signer(&self, intent: &SwapIntent) -> SwapResult<()> {
        self.signer.evm_chain_id(&intent.origin_chain)?;
        let maker = self
            .api
            .maker_address()
            .ok_or_else(|| SwapError::SigningUnavailable {
                family: ChainFamily::Evm.as_str().to_string(),
            })?;
        if !maker.eq_ignore_ascii_case(&intent.sender_address) {
            return Err(SwapError::InvalidRequest(format!(
                "sender {} is not the order-signing wallet {}",
                intent.sender_address, maker
            )));
        }
        Ok(())
    }

    async fn get_quote(&self, intent: &SwapIntent, dry: bool) -> SwapResult<Quote> {
        check_minimum(&self.config.minimums, intent)?;

        let params = FusionQuoteParams {
            src_chain_id: self.signer.evm_chain_id(&intent.origin_chain)?,
            dst_chain_id: self.signer.evm_chain_id(&intent.destination_chain)?,
            src_token: evm_token(&intent.origin_asset),
            dst_token: evm_token(&intent.destination_asset),
            amount: intent.amount.clone(),
            wallet_address: intent.sender_address.clone(),
        };
        let quote = self.api.quote(&params).await?;

        let (id, settlement) = match (&quote.quote_id, dry) {
            (_, true) => (format!("dry-{}", intent.id), Settlement::Estimate),
            (Some(quote_id), false) => (
                quote_id.clone(),
                Settlement::Escrow {
                    quote_id: quote_id.clone(),
                },
            ),
            (None, false) => return Err(SwapError::upstream(SERVICE, "live quote has no quoteId")),
        };

        info!(
            "Fusion+ quote {} for intent {}: {} -> {} (recommended preset {:?})",
            id, intent.id, quote.src_token_amount, quote.dst_token_amount, quote.recommended_preset
        );

        let estimated_output = quote.dst_token_amount.clone();
        let meta = FusionQuoteMeta {
            src_chain_id: params.src_chain_id,
            dst_chain_id: params.dst_chain_id,
            src_token: params.src_token,
            dst_token: params.dst_token,
            quote,
        };

        Ok(Quote {
            id,
            provider: ProviderKind::FusionPlus,
            intent: intent.clone(),
            estimated_output,
            settlement,
            expiry: Utc::now() + ChronoDuration::seconds(self.config.quote_ttl_secs),
            provider_metadata: serde_json::to_value(&meta)
                .map_err(|e| SwapError::upstream(SERVICE, e))?,
        })
    }

    async fn create_order(
        &self,
        quote: &Quote,
        wallet: &str,
        preset: Option<String>,
    ) -> SwapResult<CreatedOrder> {
        quote.ensure_fresh()?;
        if !matches!(quote.settlement, Settlement::Escrow { .. }) {
            return Err(SwapError::InvalidRequest(
                "a dry Fusion+ quote cannot be turned into an order".to_string(),
            ));
        }
        let meta: FusionQuoteMeta = serde_json::from_value(quote.provider_metadata.clone())
            .map_err(|e| SwapError::InvalidRequest(format!("quote metadata unreadable: {}", e)))?;

        let (preset_name, chosen) = select_preset(&meta.quote, preset.as_deref())?;
        let secrets = SecretVault::generate(chosen.secrets_count)?;
        debug!(
            "Using {} preset with {} secrets for quote {}",
            preset_name,
            secrets.len(),
            quote.id
        );

        let params = OrderParams {
            wallet_address: wallet.to_string(),
            src_chain_id: meta.src_chain_id,
            dst_chain_id: meta.dst_chain_id,
            src_token: meta.src_token.clone(),
            dst_token: meta.dst_token.clone(),
            amount: quote.intent.amount.clone(),
            preset: preset_name.clone(),
            source: self.config.source.clone(),
            hash_lock: secrets.hash_lock_hex(),
            secret_hashes: secrets.secret_hashes_hex(),
        };
        let prepared = self.api.create_order(&meta.quote, &params).await?;

        let payload = OrderPayload {
            prepared: prepared.clone(),
            secret_hashes: params.secret_hashes,
            preset: preset_name,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| SwapError::upstream(SERVICE, e))?;

        Ok(CreatedOrder {
            order: Order::new(prepared.hash, quote.clone(), payload),
            secrets: Some(secrets),
        })
    }

    async fn submit_order(&self, order: &Order) -> SwapResult<SubmissionResult> {
        let payload = payload_of(order)?;
        let response = self
            .api
            .submit_order(
                payload.prepared.src_chain_id,
                &payload.prepared,
                &payload.prepared.quote_id,
                &payload.secret_hashes,
            )
            .await?;

        Ok(SubmissionResult {
            order_id: order.order_id.clone(),
            transaction: None,
            response,
        })
    }

    async fn get_status(&self, order: &Order) -> SwapResult<NormalizedStatus> {
        let status = self.api.order_status(&order.order_id).await?;
        Ok(NormalizedStatus::new(normalize_status(&status.status), &status.status)
            .with_detail(json!({ "fills": status.fills })))
    }

    async fn ready_fills(&self, order: &Order) -> SwapResult<Vec<usize>> {
        let fills = self.api.ready_fills(&order.order_id).await?;
        Ok(fills.into_iter().map(|f| f.idx).collect())
    }

    async fn submit_secret(&self, order: &Order, secret: &Secret) -> SwapResult<()> {
        self.api
            .submit_secret(&order.order_id, &secret.to_hex())
            .await
    }

    fn uses_secrets(&self) -> bool {
        true
    }

    fn terminal_set(&self) -> TerminalSet {
        TerminalSet::new([
            StatusKind::Success,
            StatusKind::Expired,
            StatusKind::Refunded,
            StatusKind::Failed,
        ])
    }

    fn poll_policy(&self, base: PollPolicy) -> PollPolicy {
        base.with_max_attempts(self.config.max_poll_attempts)
    }
}
