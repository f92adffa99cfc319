//! EVM provider with multi-RPC failover and gas pricing

use crate::config::{EvmChainConfig, GasPriceStrategy};
use crate::error::{SwapError, SwapResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Buffer added on top of estimates, in percent
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;
const GAS_PRICE_BUFFER_PERCENT: u64 = 10;

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Add the configured buffer to every component
    pub fn buffered(&self) -> GasPrice {
        let bump = |v: U256| v + v * GAS_PRICE_BUFFER_PERCENT / 100;
        match self {
            GasPrice::Legacy(price) => GasPrice::Legacy(bump(*price)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: bump(*max_fee_per_gas),
                max_priority_fee_per_gas: bump(*max_priority_fee_per_gas),
            },
        }
    }
}

/// Add the gas limit buffer to an estimate
pub fn buffered_gas_limit(estimate: U256) -> U256 {
    estimate + estimate * GAS_LIMIT_BUFFER_PERCENT / 100
}

/// HTTP providers for one EVM chain with automatic failover
pub struct EvmProvider {
    config: EvmChainConfig,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
}

impl EvmProvider {
    /// Create a provider set from chain configuration
    pub fn new(config: EvmChainConfig) -> SwapResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if http_providers.is_empty() {
            return Err(SwapError::ConfigurationMissing(format!(
                "no valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn explorer_tx_url(&self) -> &str {
        &self.config.explorer_tx_url
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.confirmation_timeout_secs)
    }

    fn unavailable(&self, message: impl ToString) -> SwapError {
        SwapError::upstream(format!("evm:{}", self.config.chain_id), message)
    }

    /// Pending nonce for an account, trying every provider
    pub async fn pending_nonce(&self, from: Address) -> SwapResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(from, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(nonce) => return Ok(nonce),
                Err(e) => {
                    warn!("Failed to get nonce on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.unavailable("all providers failed to return a nonce"))
    }

    /// Estimate gas for a transaction, buffered
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> SwapResult<U256> {
        let estimate = self.http().estimate_gas(tx, None).await.map_err(|e| {
            // A revert during estimation is the contract's verdict, not a network issue
            let msg = e.to_string();
            if msg.contains("execution reverted") || msg.contains("insufficient funds") {
                SwapError::tx_failed(msg, None)
            } else {
                self.unavailable(msg)
            }
        })?;
        Ok(buffered_gas_limit(estimate))
    }

    /// Get current gas price based on chain strategy, buffered
    pub async fn gas_price(&self) -> SwapResult<GasPrice> {
        let price = match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.unavailable(e))?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                }
            }
        };

        let buffered = price.buffered();
        debug!("Gas price for chain {}: {:?}", self.config.chain_id, buffered);
        Ok(buffered)
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> SwapResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.unavailable(e))?
            .ok_or_else(|| self.unavailable("no latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| self.unavailable("no base fee in block"))?;

        let priority_fee = self
            .http()
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await
            .unwrap_or_else(|_| U256::from(1_000_000_000u64));

        // Max fee = 2 * base_fee + priority_fee
        let max_fee = base_fee * 2 + priority_fee;

        // Cap at configured max
        let max_wei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_wei);

        Ok((max_fee, std::cmp::min(priority_fee, max_fee)))
    }

    /// Broadcast a signed transaction
    pub async fn send_raw(&self, raw: Bytes) -> SwapResult<H256> {
        match self.http().send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("insufficient funds")
                    || msg.contains("nonce too low")
                    || msg.contains("execution reverted")
                {
                    Err(SwapError::tx_failed(msg, None))
                } else {
                    Err(self.unavailable(msg))
                }
            }
        }
    }

    /// Get transaction receipt
    pub async fn receipt(&self, tx_hash: H256) -> SwapResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.unavailable(e))
    }
}
