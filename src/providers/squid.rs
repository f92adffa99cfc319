//! Squid Router route-then-execute backend
//!
//! A route carries a prepared transaction for the origin chain. Executing it (after an
//! ERC20 approval for token sources) is the submission; cross-chain delivery is then
//! tracked through the status endpoint by transaction and request id.

use super::http::{decode, ApiClient};
use super::{check_minimum, evm_token, CreatedOrder, ProviderAdapter};
use crate::chain::{ChainSigner, ContractCallRequest, TokenApproval};
use crate::config::SquidConfig;
use crate::error::{SwapError, SwapResult};
use crate::poller::{PollPolicy, RateLimitBackoff, TerminalSet};
use crate::types::{
    parse_amount, NormalizedStatus, Order, ProviderKind, Quote, Settlement, StatusKind,
    SubmissionResult, SwapIntent, TxResult,
};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SERVICE: &str = "squid_router";

/// Route request; chain ids are decimal strings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParams {
    pub from_address: String,
    pub from_chain: String,
    pub from_token: String,
    pub from_amount: String,
    pub to_chain: String,
    pub to_token: String,
    pub to_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub route: Value,
    pub request_id: String,
}

/// Identifies one executed route for status lookups
#[derive(Debug, Clone, PartialEq)]
pub struct StatusQuery {
    pub transaction_id: String,
    pub request_id: String,
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub quote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquidStatus {
    #[serde(default)]
    pub squid_transaction_status: Option<String>,
    #[serde(default)]
    pub axelar_transaction_url: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

impl SquidStatus {
    fn not_found() -> Self {
        Self {
            squid_transaction_status: Some("not_found".to_string()),
            axelar_transaction_url: None,
            raw: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    target: String,
    data: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    gas_limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteEcho {
    from_amount: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteEstimate {
    to_amount: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteBody {
    #[serde(default)]
    quote_id: Option<String>,
    #[serde(default)]
    transaction_request: Option<TransactionRequest>,
    params: RouteEcho,
    estimate: RouteEstimate,
}

/// Map a Squid transaction status onto the shared taxonomy
pub fn normalize_status(raw: &str) -> StatusKind {
    match raw {
        "success" => StatusKind::Success,
        "partial_success" => StatusKind::PartialSuccess,
        "needs_gas" => StatusKind::NeedsGas,
        "not_found" => StatusKind::NotFound,
        _ => StatusKind::Processing,
    }
}

/// Squid route and status operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SquidApi: Send + Sync {
    async fn route(&self, params: &RouteParams) -> SwapResult<RouteResponse>;
    async fn status(&self, query: &StatusQuery) -> SwapResult<SquidStatus>;
}

/// HTTP client for the Squid v2 API
pub struct SquidHttp {
    client: ApiClient,
    integrator_id: String,
}

impl SquidHttp {
    pub fn new(config: &SquidConfig) -> SwapResult<Self> {
        if config.integrator_id.is_empty() {
            return Err(SwapError::ConfigurationMissing(
                "providers.squid.integrator_id is empty".to_string(),
            ));
        }
        Ok(Self {
            client: ApiClient::new(
                SERVICE,
                &config.base_url,
                None,
                &[("x-integrator-id", config.integrator_id.as_str())],
            )?,
            integrator_id: config.integrator_id.clone(),
        })
    }
}

#[async_trait]
impl SquidApi for SquidHttp {
    async fn route(&self, params: &RouteParams) -> SwapResult<RouteResponse> {
        debug!(
            "Requesting Squid route {}:{} -> {}:{} for {}",
            params.from_chain, params.from_token, params.to_chain, params.to_token, params.from_amount
        );
        let response = self
            .client
            .send_ok(self.client.post("/v2/route").json(params))
            .await?;

        let request_id = response
            .header("x-request-id")
            .ok_or_else(|| SwapError::upstream(SERVICE, "route response has no x-request-id"))?;
        let route = response
            .body
            .get("route")
            .cloned()
            .ok_or_else(|| SwapError::upstream(SERVICE, "route response has no route"))?;

        Ok(RouteResponse { route, request_id })
    }

    async fn status(&self, query: &StatusQuery) -> SwapResult<SquidStatus> {
        let mut params = vec![
            ("transactionId", query.transaction_id.clone()),
            ("requestId", query.request_id.clone()),
            ("integratorId", self.integrator_id.clone()),
            ("fromChainId", query.from_chain_id.clone()),
            ("toChainId", query.to_chain_id.clone()),
        ];
        if let Some(quote_id) = &query.quote_id {
            params.push(("quoteId", quote_id.clone()));
        }

        let response = self
            .client
            .send(self.client.get("/v2/status").query(&params))
            .await?;
        if response.is_not_found() {
            return Ok(SquidStatus::not_found());
        }

        let mut status: SquidStatus = decode(SERVICE, response.body.clone())?;
        status.raw = response.body;
        Ok(status)
    }
}

/// Route execution through Squid
pub struct SquidRouterAdapter {
    api: Arc<dyn SquidApi>,
    signer: Arc<ChainSigner>,
    config: SquidConfig,
    backoff: RateLimitBackoff,
}

impl SquidRouterAdapter {
    pub fn new(
        api: Arc<dyn SquidApi>,
        signer: Arc<ChainSigner>,
        config: SquidConfig,
        backoff: RateLimitBackoff,
    ) -> Self {
        Self {
            api,
            signer,
            config,
            backoff,
        }
    }

    fn route_params(&self, intent: &SwapIntent) -> SwapResult<RouteParams> {
        Ok(RouteParams {
            from_address: intent.sender_address.clone(),
            from_chain: self.signer.evm_chain_id(&intent.origin_chain)?.to_string(),
            from_token: evm_token(&intent.origin_asset),
            from_amount: intent.amount.clone(),
            to_chain: self.signer.evm_chain_id(&intent.destination_chain)?.to_string(),
            to_token: evm_token(&intent.destination_asset),
            to_address: intent.recipient_address.clone(),
        })
    }

    /// Execute the order's route on the origin chain, approving a token source first
    pub async fn execute_route(&self, order: &Order) -> SwapResult<TxResult> {
        let call = self.call_for(order)?;
        debug!(
            "Executing route for order {} on {} (approval: {})",
            order.order_id,
            call.chain,
            call.approval.is_some()
        );
        self.signer.execute_call(&call).await
    }

    /// Contract call for a route, with an approval for token sources
    fn call_for(&self, order: &Order) -> SwapResult<ContractCallRequest> {
        let route = match &order.quote.settlement {
            Settlement::Route { route, .. } => route,
            _ => {
                return Err(SwapError::InvalidRequest(format!(
                    "order {} has no Squid route",
                    order.order_id
                )))
            }
        };
        let body: RouteBody = serde_json::from_value(route.clone())
            .map_err(|e| SwapError::InvalidRequest(format!("unreadable route: {}", e)))?;
        let tx = body.transaction_request.ok_or_else(|| {
            SwapError::InvalidRequest("no transaction request in route".to_string())
        })?;

        let intent = &order.quote.intent;
        let approval = match &intent.origin_asset.token {
            Some(token) => Some(TokenApproval {
                token: token.clone(),
                amount: parse_amount(&body.params.from_amount)?,
            }),
            None => None,
        };

        Ok(ContractCallRequest {
            chain: intent.origin_chain.clone(),
            target: tx.target,
            data: tx.data,
            value: tx.value,
            gas_limit: tx.gas_limit,
            approval,
        })
    }
}

#[async_trait]
impl ProviderAdapter for SquidRouterAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SquidRouter
    }

    fn ensure_signer(&self, intent: &SwapIntent) -> SwapResult<()> {
        self.signer.ensure_signing(&intent.origin_chain)
    }

    /// Routes reserve nothing, so a dry quote is a full route as well
    async fn get_quote(&self, intent: &SwapIntent, dry: bool) -> SwapResult<Quote> {
        check_minimum(&self.config.minimums, intent)?;
        let params = self.route_params(intent)?;

        let response = self
            .backoff
            .run(SERVICE, || self.api.route(&params))
            .await?;
        let body: RouteBody = serde_json::from_value(response.route.clone())
            .map_err(|e| SwapError::upstream(SERVICE, format!("unexpected route: {}", e)))?;

        info!(
            "Squid route {} for intent {}: {} -> {} (dry: {})",
            response.request_id, intent.id, body.params.from_amount, body.estimate.to_amount, dry
        );

        Ok(Quote {
            id: response.request_id.clone(),
            provider: ProviderKind::SquidRouter,
            intent: intent.clone(),
            estimated_output: body.estimate.to_amount,
            settlement: Settlement::Route {
                request_id: response.request_id,
                quote_id: body.quote_id,
                route: response.route,
            },
            expiry: Utc::now() + ChronoDuration::seconds(self.config.quote_ttl_secs),
            provider_metadata: json!({ "fromChain": params.from_chain, "toChain": params.to_chain }),
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
            Settlement::Route {
                request_id,
                quote_id,
                ..
            } => {
                let payload = json!({ "requestId": request_id, "quoteId": quote_id });
                Ok(CreatedOrder::without_secrets(Order::new(
                    request_id.clone(),
                    quote.clone(),
                    payload,
                )))
            }
            _ => Err(SwapError::InvalidRequest(
                "Squid orders need a route quote".to_string(),
            )),
        }
    }

    async fn submit_order(&self, order: &Order) -> SwapResult<SubmissionResult> {
        let tx = self.execute_route(order).await?;
        let axelar = format!("{}{}", self.config.explorer_url, tx.transaction_id);
        info!("Route for order {} executed: {}", order.order_id, axelar);

        Ok(SubmissionResult {
            order_id: order.order_id.clone(),
            response: json!({ "hash": tx.transaction_id, "axelarScanLink": axelar }),
            transaction: Some(TxResult {
                transaction_id: tx.transaction_id,
                explorer_reference: axelar,
            }),
        })
    }

    async fn get_status(&self, order: &Order) -> SwapResult<NormalizedStatus> {
        let transaction_id = order.transaction_id.clone().ok_or_else(|| {
            SwapError::InvalidRequest(format!(
                "order {} has no origin transaction to track",
                order.order_id
            ))
        })?;
        let quote_id = match &order.quote.settlement {
            Settlement::Route { quote_id, .. } => quote_id.clone(),
            _ => None,
        };
        let intent = &order.quote.intent;
        let query = StatusQuery {
            transaction_id: transaction_id.clone(),
            request_id: order.order_id.clone(),
            from_chain_id: self.signer.evm_chain_id(&intent.origin_chain)?.to_string(),
            to_chain_id: self.signer.evm_chain_id(&intent.destination_chain)?.to_string(),
            quote_id,
        };

        let status = self.api.status(&query).await?;
        let raw = status
            .squid_transaction_status
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let link = status
            .axelar_transaction_url
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.config.explorer_url, transaction_id));

        Ok(NormalizedStatus::new(normalize_status(&raw), raw)
            .with_detail(json!({ "axelarScanLink": link, "response": status.raw })))
    }

    fn terminal_set(&self) -> TerminalSet {
        TerminalSet::new([
            StatusKind::Success,
            StatusKind::PartialSuccess,
            StatusKind::NeedsGas,
            StatusKind::NotFound,
        ])
    }

    fn poll_policy(&self, base: PollPolicy) -> PollPolicy {
        match self.config.max_poll_attempts {
            Some(max) => base.with_max_attempts(Some(max)),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::evm::{EvmReceipt, MockEvmRpc};
    use crate::chain::EvmSigner;
    use crate::config::MinimumAmount;
    use crate::error::ErrorKind;
    use crate::providers::fusion::tests::base_to_arbitrum_intent;
    use ethers::types::{Address, H256};
    use mockall::Sequence;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    const ROUTER: &str = "0xce16f69375520ab01377ce7b88f5ba8c48f8d666";
    const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

    fn config() -> SquidConfig {
        SquidConfig {
            base_url: "https://v2.api.squidrouter.com".to_string(),
            integrator_id: "integrator".to_string(),
            quote_ttl_secs: 120,
            minimums: vec![MinimumAmount {
                chain: "base".to_string(),
                asset: "base-usdc".to_string(),
                amount: 1_000_000,
            }],
            max_poll_attempts: None,
            explorer_url: "https://axelarscan.io/gmp/".to_string(),
        }
    }

    fn route_json() -> Value {
        json!({
            "quoteId": "sq-quote",
            "transactionRequest": {
                "target": ROUTER,
                "data": "0xdeadbeef",
                "value": "0",
                "gasLimit": "400000"
            },
            "params": { "fromAmount": "5000000" },
            "estimate": { "toAmount": "4990000" }
        })
    }

    fn route_ok() -> SwapResult<RouteResponse> {
        Ok(RouteResponse {
            route: route_json(),
            request_id: "req-1".to_string(),
        })
    }

    fn signer(rpc: Option<MockEvmRpc>) -> Arc<ChainSigner> {
        Arc::new(ChainSigner::new(
            "xrpl",
            HashMap::from([("base".to_string(), 8453), ("arbitrum".to_string(), 42161)]),
            None,
            rpc.map(|r| EvmSigner::new(Arc::new(r), HashMap::new())),
        ))
    }

    fn receipt(hash: H256, success: bool) -> EvmReceipt {
        EvmReceipt {
            tx_hash: hash,
            success,
            block_number: Some(10),
        }
    }

    async fn routed_order(adapter: &SquidRouterAdapter) -> Order {
        let quote = adapter
            .get_quote(&base_to_arbitrum_intent("5000000"), false)
            .await
            .unwrap();
        adapter.create_order(&quote, "", None).await.unwrap().order
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_retried_after_rate_limit() {
        let mut api = MockSquidApi::new();
        let mut calls = 0;
        api.expect_route().times(3).returning(move |_| {
            calls += 1;
            if calls <= 2 {
                Err(SwapError::RateLimited {
                    service: SERVICE.to_string(),
                })
            } else {
                route_ok()
            }
        });
        let adapter =
            SquidRouterAdapter::new(Arc::new(api), signer(None), config(), RateLimitBackoff::default());

        let start = Instant::now();
        let quote = adapter
            .get_quote(&base_to_arbitrum_intent("5000000"), true)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(quote.id, "req-1");
        assert_eq!(quote.estimated_output, "4990000");
        assert!(matches!(quote.settlement, Settlement::Route { .. }));
    }

    #[tokio::test]
    async fn test_below_minimum_makes_no_call() {
        let mut api = MockSquidApi::new();
        api.expect_route().never();
        let adapter =
            SquidRouterAdapter::new(Arc::new(api), signer(None), config(), RateLimitBackoff::default());

        let err = adapter
            .get_quote(&base_to_arbitrum_intent("999999"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn test_origin_chain_needs_evm_key() {
        let intent = base_to_arbitrum_intent("5000000");
        let unsigned =
            SquidRouterAdapter::new(Arc::new(MockSquidApi::new()), signer(None), config(), RateLimitBackoff::default());
        assert!(matches!(
            unsigned.ensure_signer(&intent).unwrap_err(),
            SwapError::SigningUnavailable { .. }
        ));

        let keyed = SquidRouterAdapter::new(
            Arc::new(MockSquidApi::new()),
            signer(Some(MockEvmRpc::new())),
            config(),
            RateLimitBackoff::default(),
        );
        assert!(keyed.ensure_signer(&intent).is_ok());
    }

    #[tokio::test]
    async fn test_token_source_approves_then_swaps() {
        let mut api = MockSquidApi::new();
        api.expect_route().returning(|_| route_ok());

        let mut rpc = MockEvmRpc::new();
        let mut seq = Sequence::new();
        let token: Address = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap();
        let router: Address = ROUTER.parse().unwrap();
        rpc.expect_send_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |_, tx| tx.to == token && tx.data[..4] == APPROVE_SELECTOR)
            .returning(|_, _| Ok(H256::from_low_u64_be(1)));
        rpc.expect_wait_for_receipt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, h| Ok(receipt(h, true)));
        rpc.expect_send_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |chain, tx| *chain == 8453 && tx.to == router)
            .returning(|_, _| Ok(H256::from_low_u64_be(2)));
        rpc.expect_wait_for_receipt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, h| Ok(receipt(h, true)));

        let adapter = SquidRouterAdapter::new(
            Arc::new(api),
            signer(Some(rpc)),
            config(),
            RateLimitBackoff::default(),
        );
        let order = routed_order(&adapter).await;
        assert_eq!(order.order_id, "req-1");

        let submitted = adapter.submit_order(&order).await.unwrap();
        let tx = submitted.transaction.unwrap();
        assert_eq!(tx.transaction_id, format!("{:?}", H256::from_low_u64_be(2)));
        assert_eq!(
            tx.explorer_reference,
            format!("https://axelarscan.io/gmp/{}", tx.transaction_id)
        );
    }

    #[tokio::test]
    async fn test_failed_approval_never_swaps() {
        let mut api = MockSquidApi::new();
        api.expect_route().returning(|_| route_ok());

        let mut rpc = MockEvmRpc::new();
        rpc.expect_send_transaction()
            .times(1)
            .returning(|_, _| Ok(H256::from_low_u64_be(1)));
        rpc.expect_wait_for_receipt()
            .times(1)
            .returning(|_, h| Ok(receipt(h, false)));

        let adapter = SquidRouterAdapter::new(
            Arc::new(api),
            signer(Some(rpc)),
            config(),
            RateLimitBackoff::default(),
        );
        let order = routed_order(&adapter).await;

        let err = adapter.submit_order(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    }

    #[tokio::test]
    async fn test_status_needs_transaction_and_maps_kinds() {
        let mut api = MockSquidApi::new();
        api.expect_route().returning(|_| route_ok());
        api.expect_status()
            .withf(|q| {
                q.request_id == "req-1"
                    && q.from_chain_id == "8453"
                    && q.to_chain_id == "42161"
                    && q.quote_id.as_deref() == Some("sq-quote")
            })
            .times(1)
            .returning(|_| {
                Ok(SquidStatus {
                    squid_transaction_status: Some("partial_success".to_string()),
                    axelar_transaction_url: None,
                    raw: json!({}),
                })
            });
        let adapter =
            SquidRouterAdapter::new(Arc::new(api), signer(None), config(), RateLimitBackoff::default());

        let mut order = routed_order(&adapter).await;
        let err = adapter.get_status(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        order.transaction_id = Some("0xabc".to_string());
        let status = adapter.get_status(&order).await.unwrap();
        assert_eq!(status.kind, StatusKind::PartialSuccess);
        assert!(adapter.terminal_set().contains(status.kind));
        assert_eq!(
            status.detail.unwrap()["axelarScanLink"],
            "https://axelarscan.io/gmp/0xabc"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(normalize_status("success"), StatusKind::Success);
        assert_eq!(normalize_status("needs_gas"), StatusKind::NeedsGas);
        assert_eq!(normalize_status("not_found"), StatusKind::NotFound);
        assert_eq!(normalize_status("ongoing"), StatusKind::Processing);
    }
}
