//! Order lifecycle manager - drives one swap from quote to terminal state

use super::registry::SwapRegistry;
use super::state::{OrderState, SwapOutcome, SwapReport};
use crate::chain::ChainSigner;
use crate::config::{KeyMaterial, Settings};
use crate::error::{SwapError, SwapResult};
use crate::poller::{PollOutcome, PollPolicy, StatusPoller};
use crate::providers::fusion::FusionHttp;
use crate::providers::one_click::OneClickHttp;
use crate::providers::squid::SquidHttp;
use crate::providers::{FusionPlusAdapter, OneClickAdapter, ProviderAdapter, SquidRouterAdapter};
use crate::secrets::SecretVault;
use crate::types::{
    Asset, NormalizedStatus, Order, ProviderKind, Quote, Settlement, SwapIntent,
};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifies an existing order for a status check
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReference {
    pub provider: ProviderKind,
    /// Deposit address, order hash or request id
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub origin_chain: Option<String>,
    pub destination_chain: Option<String>,
    pub quote_id: Option<String>,
}

impl OrderReference {
    fn to_order(&self) -> SwapResult<Order> {
        let settlement = match self.provider {
            ProviderKind::OneClick => Settlement::DepositAddress {
                address: self.order_id.clone(),
                memo: None,
            },
            ProviderKind::FusionPlus => Settlement::Escrow {
                quote_id: self.quote_id.clone().unwrap_or_default(),
            },
            ProviderKind::SquidRouter => {
                if self.transaction_id.is_none()
                    || self.origin_chain.is_none()
                    || self.destination_chain.is_none()
                {
                    return Err(SwapError::InvalidRequest(
                        "Squid status needs the transaction id and both chains".to_string(),
                    ));
                }
                Settlement::Route {
                    request_id: self.order_id.clone(),
                    quote_id: self.quote_id.clone(),
                    route: serde_json::Value::Null,
                }
            }
        };

        let intent = SwapIntent {
            id: Uuid::nil(),
            origin_chain: self.origin_chain.clone().unwrap_or_default(),
            origin_asset: Asset::native(""),
            destination_chain: self.destination_chain.clone().unwrap_or_default(),
            destination_asset: Asset::native(""),
            amount: String::new(),
            sender_address: String::new(),
            recipient_address: String::new(),
        };
        let quote = Quote {
            id: self.quote_id.clone().unwrap_or_else(|| self.order_id.clone()),
            provider: self.provider,
            intent,
            estimated_output: String::new(),
            settlement,
            expiry: Utc::now(),
            provider_metadata: serde_json::Value::Null,
        };

        let mut order = Order::new(self.order_id.clone(), quote, serde_json::Value::Null);
        order.transaction_id = self.transaction_id.clone();
        Ok(order)
    }
}

/// Runs swaps against the registered provider adapters
pub struct OrderLifecycleManager {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    signer: Arc<ChainSigner>,
    poller: StatusPoller,
    policy: PollPolicy,
    registry: Arc<SwapRegistry>,
}

impl OrderLifecycleManager {
    pub fn new(signer: Arc<ChainSigner>, poller: StatusPoller, policy: PollPolicy) -> Self {
        Self {
            adapters: HashMap::new(),
            signer,
            poller,
            policy,
            registry: Arc::new(SwapRegistry::new()),
        }
    }

    /// Build the chain signer and one adapter per configured provider
    pub fn from_settings(settings: &Settings, keys: &KeyMaterial) -> SwapResult<Self> {
        let signer = Arc::new(ChainSigner::from_settings(settings, keys)?);
        let poller = StatusPoller::from_engine(&settings.engine);
        let mut manager = Self::new(signer.clone(), poller, PollPolicy::from_engine(&settings.engine));

        if let Some(config) = &settings.providers.one_click {
            let api = Arc::new(OneClickHttp::new(config)?);
            manager.register(Arc::new(OneClickAdapter::new(api, signer.clone(), config.clone())));
        }

        if let Some(config) = &settings.providers.fusion_plus {
            let wallet = keys
                .evm_private_key()
                .map(|key| FusionHttp::wallet_from_key(&key))
                .transpose()?;
            let api = Arc::new(FusionHttp::new(config, wallet)?);
            manager.register(Arc::new(FusionPlusAdapter::new(api, signer.clone(), config.clone())));
        }

        if let Some(config) = &settings.providers.squid {
            let api = Arc::new(SquidHttp::new(config)?);
            manager.register(Arc::new(SquidRouterAdapter::new(
                api,
                signer.clone(),
                config.clone(),
                poller.backoff(),
            )));
        }

        info!("Lifecycle manager ready with providers {:?}", manager.providers());
        Ok(manager)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn signer(&self) -> &Arc<ChainSigner> {
        &self.signer
    }

    pub fn registry(&self) -> Arc<SwapRegistry> {
        self.registry.clone()
    }

    fn adapter(&self, provider: ProviderKind) -> SwapResult<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            SwapError::ConfigurationMissing(format!("provider {} is not configured", provider))
        })
    }

    /// Price an intent without creating an order
    pub async fn quote(
        &self,
        intent: &SwapIntent,
        provider: ProviderKind,
        dry: bool,
    ) -> SwapResult<Quote> {
        self.adapter(provider)?.get_quote(intent, dry).await
    }

    /// Run a swap to a terminal state.
    ///
    /// Terminal backend statuses come back as a report; errors before submission leave
    /// nothing to reconcile, errors after it carry the order and transaction ids.
    pub async fn execute(
        &self,
        intent: SwapIntent,
        provider: ProviderKind,
        preset: Option<String>,
    ) -> SwapResult<SwapReport> {
        let adapter = self.adapter(provider)?;
        let _guard = self.registry.claim(intent.id, provider)?;
        crate::metrics::record_swap_started(provider.as_str());
        info!(
            "Starting swap {} via {}: {} {} on {} -> {}",
            intent.id,
            provider,
            intent.amount,
            intent.origin_asset.id,
            intent.origin_chain,
            intent.destination_chain
        );

        let mut report = SwapReport::new(intent.id, provider);
        let result = self
            .drive(adapter.as_ref(), &intent, preset, &mut report)
            .await;

        if let Err(e) = &result {
            error!("Swap {} failed in {}: {}", intent.id, report.state, e);
            report.fail(e.to_string());
            if let SwapError::Reconcile { order_id, .. } = e {
                warn!(
                    "Intent {} is held until order {} is reconciled",
                    intent.id, order_id
                );
                report.needs_reconciliation = true;
            }
        }
        if let Some(outcome) = report.outcome() {
            crate::metrics::record_swap_outcome(provider.as_str(), outcome.as_str());
        }
        self.registry.record(report.clone());

        result.map(|()| report)
    }

    fn advance(
        &self,
        report: &mut SwapReport,
        next: OrderState,
        note: Option<String>,
    ) -> SwapResult<()> {
        report.advance(next, note)?;
        self.registry
            .update(report.intent_id, next, report.order_id.as_deref());
        debug!("Swap {} -> {}", report.intent_id, next);
        Ok(())
    }

    async fn drive(
        &self,
        adapter: &dyn ProviderAdapter,
        intent: &SwapIntent,
        preset: Option<String>,
        report: &mut SwapReport,
    ) -> SwapResult<()> {
        adapter.ensure_signer(intent)?;
        let quote = adapter.get_quote(intent, false).await?;
        report.quote_id = Some(quote.id.clone());
        self.advance(report, OrderState::Quoted, Some(quote.estimated_output.clone()))?;

        let created = adapter
            .create_order(&quote, &intent.sender_address, preset)
            .await?;
        let mut order = created.order;
        report.order_id = Some(order.order_id.clone());
        self.advance(report, OrderState::Created, None)?;

        let vault = created.secrets.map(SecretVault::hold);
        if adapter.uses_secrets() && vault.is_none() {
            return Err(SwapError::InvalidRequest(format!(
                "{} order {} came without secrets",
                adapter.kind(),
                order.order_id
            )));
        }

        let submission = adapter
            .submit_order(&order)
            .await
            .map_err(|e| e.with_order(order.order_id.clone(), None))?;
        if let Some(tx) = &submission.transaction {
            order.transaction_id = Some(tx.transaction_id.clone());
            report.transaction = Some(tx.clone());
        }
        let explorer = report
            .transaction
            .as_ref()
            .map(|t| t.explorer_reference.clone());
        self.advance(report, OrderState::Submitted, explorer)?;

        let order_id = order.order_id.clone();
        let tx_id = order.transaction_id.clone();
        let ctx = |e: SwapError| e.with_order(order_id.clone(), tx_id.clone());

        let vault = Mutex::new(vault);
        if adapter.uses_secrets() {
            self.await_fills(adapter, &order, &vault, report)
                .await
                .map_err(ctx)?;
        }

        self.advance(report, OrderState::Settling, None)?;
        let outcome = self
            .poller
            .poll_status(
                adapter.kind().as_str(),
                adapter.poll_policy(self.policy),
                &adapter.terminal_set(),
                || self.settle_read(adapter, &order, &vault),
            )
            .await
            .map_err(ctx)?;

        if let Some(vault) = vault.lock().await.as_mut() {
            report.released_fills = vault.released().iter().copied().collect();
            vault.discard();
        }

        match outcome {
            PollOutcome::Terminal { status, .. } => {
                let result = SwapOutcome::from_status(status.kind);
                if result == SwapOutcome::Failed {
                    report.reason = Some(status.raw.clone());
                }
                info!(
                    "Swap {} finished {} (backend status {})",
                    intent.id,
                    result.as_str(),
                    status.raw
                );
                report.final_status = Some(status.clone());
                self.advance(report, OrderState::Terminal(result), Some(status.raw))
            }
            PollOutcome::GaveUp { last, attempts } => {
                report.final_status = Some(last.clone());
                report.fail("status unresolved");
                Err(ctx(SwapError::StatusUnresolved {
                    order_id: order.order_id.clone(),
                    attempts,
                    last_status: last.raw,
                }))
            }
        }
    }

    /// Wait for the first ready fills until the quote deadline and release them
    async fn await_fills(
        &self,
        adapter: &dyn ProviderAdapter,
        order: &Order,
        vault: &Mutex<Option<SecretVault>>,
        report: &mut SwapReport,
    ) -> SwapResult<()> {
        self.advance(report, OrderState::AwaitingFill, None)?;

        let remaining = (order.quote.expiry - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let outcome = self
            .poller
            .poll(
                adapter.kind().as_str(),
                self.policy.until(remaining),
                |fills: &Vec<usize>| !fills.is_empty(),
                || adapter.ready_fills(order),
            )
            .await?;

        match outcome {
            PollOutcome::Terminal { status: ready, .. } => {
                let mut guard = vault.lock().await;
                if let Some(vault) = guard.as_mut() {
                    let released = self.release_ready(adapter, order, vault, &ready).await?;
                    self.advance(
                        report,
                        OrderState::SecretsReleased,
                        Some(format!("fills {:?}", released)),
                    )?;
                }
            }
            PollOutcome::GaveUp { attempts, .. } => {
                warn!(
                    "No fills ready for order {} after {} checks; settling without release",
                    order.order_id, attempts
                );
            }
        }
        Ok(())
    }

    /// Release and submit secrets for fills not yet released
    async fn release_ready(
        &self,
        adapter: &dyn ProviderAdapter,
        order: &Order,
        vault: &mut SecretVault,
        ready: &[usize],
    ) -> SwapResult<Vec<usize>> {
        let fresh = vault.release(ready)?;
        let mut released = Vec::with_capacity(fresh.len());
        for (idx, secret) in fresh {
            adapter.submit_secret(order, &secret).await?;
            crate::metrics::record_secret_released(adapter.kind().as_str());
            info!("Secret for fill {} of order {} submitted", idx, order.order_id);
            released.push(idx);
        }
        Ok(released)
    }

    /// One settlement read; escrow orders release newly ready fills first.
    ///
    /// A failed readiness check does not block the status read; the next read retries it.
    async fn settle_read(
        &self,
        adapter: &dyn ProviderAdapter,
        order: &Order,
        vault: &Mutex<Option<SecretVault>>,
    ) -> SwapResult<NormalizedStatus> {
        {
            let mut guard = vault.lock().await;
            if let Some(vault) = guard.as_mut().filter(|v| !v.is_exhausted()) {
                match adapter.ready_fills(order).await {
                    Ok(ready) => {
                        self.release_ready(adapter, order, vault, &ready).await?;
                    }
                    Err(e) => warn!(
                        "Ready fills check for order {} failed, reading status anyway: {}",
                        order.order_id, e
                    ),
                }
            }
        }
        adapter.get_status(order).await
    }

    /// Status of an existing order; `poll` waits for a terminal status
    pub async fn status(&self, reference: &OrderReference, poll: bool) -> SwapResult<NormalizedStatus> {
        let adapter = self.adapter(reference.provider)?;
        let order = reference.to_order()?;

        if !poll {
            return adapter.get_status(&order).await;
        }

        let outcome = self
            .poller
            .poll_status(
                adapter.kind().as_str(),
                adapter.poll_policy(self.policy),
                &adapter.terminal_set(),
                || adapter.get_status(&order),
            )
            .await?;
        match outcome {
            PollOutcome::Terminal { status, .. } => Ok(status),
            PollOutcome::GaveUp { last, attempts } => Err(SwapError::StatusUnresolved {
                order_id: order.order_id,
                attempts,
                last_status: last.raw,
            }),
        }
    }
}
