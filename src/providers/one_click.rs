//! 1Click deposit-address backend
//!
//! A live quote returns a one-time deposit address on the origin chain. Sending the
//! quoted amount there is the whole submission; the backend then settles on the
//! destination chain and reports progress keyed by that address.

use super::http::{decode, ApiClient};
use super::{check_minimum, CreatedOrder, ProviderAdapter};
use crate::chain::{ChainSigner, TransferRequest};
use crate::config::OneClickConfig;
use crate::error::{SwapError, SwapResult};
use crate::poller::{PollPolicy, TerminalSet};
use crate::types::{
    NormalizedStatus, Order, ProviderKind, Quote, Settlement, StatusKind, SubmissionResult,
    SwapIntent,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SERVICE: &str = "one_click";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub dry: bool,
    pub swap_type: String,
    pub slippage_tolerance: u32,
    pub origin_asset: String,
    pub deposit_type: String,
    pub destination_asset: String,
    pub amount: String,
    pub refund_to: String,
    pub refund_type: String,
    pub recipient: String,
    pub recipient_type: String,
    pub deadline: String,
    pub referral: String,
    pub quote_waiting_time_ms: u64,
}

impl QuoteRequest {
    /// Exact-input request refunding to the sender on the origin chain
    pub fn for_intent(
        intent: &SwapIntent,
        dry: bool,
        config: &OneClickConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            dry,
            swap_type: "EXACT_INPUT".to_string(),
            slippage_tolerance: config.slippage_bps,
            origin_asset: intent.origin_asset.id.clone(),
            deposit_type: "ORIGIN_CHAIN".to_string(),
            destination_asset: intent.destination_asset.id.clone(),
            amount: intent.amount.clone(),
            refund_to: intent.sender_address.clone(),
            refund_type: "ORIGIN_CHAIN".to_string(),
            recipient: intent.recipient_address.clone(),
            recipient_type: "DESTINATION_CHAIN".to_string(),
            deadline: (now + ChronoDuration::seconds(config.deadline_secs))
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            referral: config.referral.clone(),
            quote_waiting_time_ms: config.quote_waiting_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDetails {
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default)]
    pub deposit_memo: Option<String>,
    pub amount_in: String,
    pub amount_out: String,
    #[serde(default)]
    pub min_amount_out: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_estimate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub quote: QuoteDetails,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub swap_details: Option<Value>,
}

impl StatusResponse {
    fn not_found() -> Self {
        Self {
            status: "NOT_FOUND".to_string(),
            updated_at: None,
            swap_details: None,
        }
    }
}

/// Map a 1Click execution status onto the shared taxonomy
pub fn normalize_status(raw: &str) -> StatusKind {
    match raw {
        "KNOWN_DEPOSIT_TX" | "PENDING_DEPOSIT" | "INCOMPLETE_DEPOSIT" => StatusKind::Pending,
        "PROCESSING" => StatusKind::Processing,
        "SUCCESS" => StatusKind::Success,
        "REFUNDED" => StatusKind::Refunded,
        "FAILED" => StatusKind::Failed,
        "NOT_FOUND" => StatusKind::NotFound,
        _ => StatusKind::Processing,
    }
}

/// 1Click REST operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OneClickApi: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> SwapResult<QuoteResponse>;
    async fn status(&self, deposit_address: &str) -> SwapResult<StatusResponse>;
}

/// HTTP client for the 1Click API
pub struct OneClickHttp {
    client: ApiClient,
}

impl OneClickHttp {
    pub fn new(config: &OneClickConfig) -> SwapResult<Self> {
        Ok(Self {
            client: ApiClient::new(SERVICE, &config.base_url, config.jwt.as_deref(), &[])?,
        })
    }
}

#[async_trait]
impl OneClickApi for OneClickHttp {
    async fn quote(&self, request: &QuoteRequest) -> SwapResult<QuoteResponse> {
        debug!(
            "Requesting 1Click quote for {} {} -> {} (dry: {})",
            request.amount, request.origin_asset, request.destination_asset, request.dry
        );
        let response = self
            .client
            .send_ok(self.client.post("/v0/quote").json(request))
            .await?;
        decode(SERVICE, response.body)
    }

    async fn status(&self, deposit_address: &str) -> SwapResult<StatusResponse> {
        let response = self
            .client
            .send(
                self.client
                    .get("/v0/status")
                    .query(&[("depositAddress", deposit_address)]),
            )
            .await?;
        if response.is_not_found() {
            return Ok(StatusResponse::not_found());
        }
        decode(SERVICE, response.body)
    }
}

/// Deposit-address settlement through 1Click
pub struct OneClickAdapter {
    api: Arc<dyn OneClickApi>,
    signer: Arc<ChainSigner>,
    config: OneClickConfig,
}

impl OneClickAdapter {
    pub fn new(api: Arc<dyn OneClickApi>, signer: Arc<ChainSigner>, config: OneClickConfig) -> Self {
        Self {
            api,
            signer,
            config,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OneClickAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OneClick
    }

    fn ensure_signer(&self, intent: &SwapIntent) -> SwapResult<()> {
        self.signer.ensure_signing(&intent.origin_chain)
    }

    async fn get_quote(&self, intent: &SwapIntent, dry: bool) -> SwapResult<Quote> {
        check_minimum(&self.config.minimums, intent)?;

        let now = Utc::now();
        let request = QuoteRequest::for_intent(intent, dry, &self.config, now);
        let response = self.api.quote(&request).await?;

        let settlement = match (&response.quote.deposit_address, dry) {
            (_, true) => Settlement::Estimate,
            (Some(address), false) => Settlement::DepositAddress {
                address: address.clone(),
                memo: response.quote.deposit_memo.clone(),
            },
            (None, false) => {
                return Err(SwapError::upstream(
                    SERVICE,
                    "live quote returned no deposit address",
                ))
            }
        };

        let id = match &settlement {
            Settlement::DepositAddress { address, .. } => address.clone(),
            _ => format!("dry-{}", intent.id),
        };
        let expiry = response
            .quote
            .deadline
            .unwrap_or_else(|| now + ChronoDuration::seconds(self.config.deadline_secs));

        info!(
            "1Click quote {} for intent {}: {} -> {}",
            id, intent.id, response.quote.amount_in, response.quote.amount_out
        );

        Ok(Quote {
            id,
            provider: ProviderKind::OneClick,
            intent: intent.clone(),
            estimated_output: response.quote.amount_out.clone(),
            settlement,
            expiry,
            provider_metadata: serde_json::to_value(&response).unwrap_or(Value::Null),
        })
    }

    async fn create_order(
        &self,
        quote: &Quote,
        _wallet: &str,
        _preset: Option<String>,
    ) -> SwapResult<CreatedOrder> {
        quote.ensure_fresh()?;
        match &quote.settlement {
            Settlement::DepositAddress { address, memo } => {
                let payload = json!({ "depositAddress": address, "memo": memo });
                Ok(CreatedOrder::without_secrets(Order::new(
                    address.clone(),
                    quote.clone(),
                    payload,
                )))
            }
            _ => Err(SwapError::InvalidRequest(
                "a dry 1Click quote has no deposit address to order against".to_string(),
            )),
        }
    }

    async fn submit_order(&self, order: &Order) -> SwapResult<SubmissionResult> {
        let (address, memo) = match &order.quote.settlement {
            Settlement::DepositAddress { address, memo } => (address.clone(), memo.clone()),
            _ => {
                return Err(SwapError::InvalidRequest(
                    "1Click order without deposit address".to_string(),
                ))
            }
        };

        let intent = &order.quote.intent;
        let request = TransferRequest {
            chain: intent.origin_chain.clone(),
            destination: address,
            asset: intent.origin_asset.clone(),
            amount: intent.amount_value()?,
            memo,
        };

        let tx = self.signer.transfer(&request).await?;
        info!(
            "Deposit for order {} sent: {}",
            order.order_id, tx.explorer_reference
        );

        Ok(SubmissionResult {
            order_id: order.order_id.clone(),
            response: json!({ "hash": tx.transaction_id, "explorerUrl": tx.explorer_reference }),
            transaction: Some(tx),
        })
    }

    async fn get_status(&self, order: &Order) -> SwapResult<NormalizedStatus> {
        let response = self.api.status(&order.order_id).await?;
        let status = NormalizedStatus::new(normalize_status(&response.status), &response.status);
        Ok(match response.swap_details {
            Some(details) => status.with_detail(details),
            None => status,
        })
    }

    fn terminal_set(&self) -> TerminalSet {
        TerminalSet::new([
            StatusKind::Success,
            StatusKind::Refunded,
            StatusKind::Failed,
        ])
    }

    fn poll_policy(&self, base: PollPolicy) -> PollPolicy {
        match self.config.max_poll_attempts {
            Some(max) => base.with_max_attempts(Some(max)),
            None => base,
        }
    }
}
