//! EVM-family transaction signing and submission

use super::provider::{EvmProvider, GasPrice};
use crate::config::EvmChainConfig;
use crate::error::{SwapError, SwapResult};
use crate::types::TxResult;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Interval between receipt lookups
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An unsigned call or transfer on one EVM chain
#[derive(Debug, Clone, PartialEq)]
pub struct EvmTransaction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Explicit gas limit; estimated when absent
    pub gas_limit: Option<U256>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvmReceipt {
    pub tx_hash: H256,
    pub success: bool,
    pub block_number: Option<u64>,
}

/// ERC20 calldata for `signature(address,uint256)`
pub fn erc20_call(signature: &str, account: Address, amount: U256) -> Bytes {
    let mut data = ethers::utils::id(signature).to_vec();
    data.extend(ethers::abi::encode(&[
        Token::Address(account),
        Token::Uint(amount),
    ]));
    data.into()
}

/// Node operations used by the signer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// Address of the signing wallet
    fn address(&self) -> Address;
    /// Sign and broadcast; returns the transaction hash
    async fn send_transaction(&self, chain_id: u64, tx: EvmTransaction) -> SwapResult<H256>;
    /// Wait until the transaction is mined
    async fn wait_for_receipt(&self, chain_id: u64, tx_hash: H256) -> SwapResult<EvmReceipt>;
}

/// ethers-backed client holding one failover provider set per chain
pub struct EthersEvmClient {
    wallet: LocalWallet,
    providers: HashMap<u64, EvmProvider>,
}

impl EthersEvmClient {
    pub fn new(chains: &HashMap<String, EvmChainConfig>, private_key: &str) -> SwapResult<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| SwapError::ConfigurationMissing(format!("invalid EVM private key: {}", e)))?;

        let mut providers = HashMap::new();
        for (name, config) in chains {
            debug!("Initializing EVM chain {} (ID: {})", name, config.chain_id);
            providers.insert(config.chain_id, EvmProvider::new(config.clone())?);
        }

        info!("EVM signer initialized with wallet: {:?}", wallet.address());
        Ok(Self { wallet, providers })
    }

    fn provider(&self, chain_id: u64) -> SwapResult<&EvmProvider> {
        self.providers.get(&chain_id).ok_or_else(|| {
            SwapError::ConfigurationMissing(format!("EVM chain {} is not configured", chain_id))
        })
    }

    /// Build a typed transaction for the chain's gas strategy
    fn build_tx(
        &self,
        chain_id: u64,
        tx: &EvmTransaction,
        nonce: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let from = self.wallet.address();
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .data(tx.data.clone())
                .value(tx.value)
                .nonce(nonce)
                .gas_price(*price)
                .chain_id(chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .data(tx.data.clone())
                .value(tx.value)
                .nonce(nonce)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(chain_id)
                .into(),
        }
    }
}

#[async_trait]
impl EvmRpc for EthersEvmClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn send_transaction(&self, chain_id: u64, tx: EvmTransaction) -> SwapResult<H256> {
        let provider = self.provider(chain_id)?;

        let nonce = provider.pending_nonce(self.wallet.address()).await?;
        let gas_price = provider.gas_price().await?;
        let mut typed = self.build_tx(chain_id, &tx, nonce, &gas_price);

        let gas_limit = match tx.gas_limit {
            Some(limit) => limit,
            None => provider.estimate_gas(&typed).await?,
        };
        typed.set_gas(gas_limit);

        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| SwapError::ConfigurationMissing(format!("EVM signing failed: {}", e)))?;

        let tx_hash = provider.send_raw(typed.rlp_signed(&signature)).await?;
        info!(
            "Transaction sent on chain {}: {:?} (nonce {})",
            chain_id, tx_hash, nonce
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, chain_id: u64, tx_hash: H256) -> SwapResult<EvmReceipt> {
        let provider = self.provider(chain_id)?;

        let wait = async {
            loop {
                match provider.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => warn!("Receipt lookup for {:?} failed: {}", tx_hash, e),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        let receipt: TransactionReceipt = timeout(provider.confirmation_timeout(), wait)
            .await
            .map_err(|_| {
                SwapError::upstream(
                    format!("evm:{}", chain_id),
                    format!("no receipt for {:?} within {:?}", tx_hash, provider.confirmation_timeout()),
                )
            })?;

        Ok(EvmReceipt {
            tx_hash,
            success: receipt.status == Some(U64::from(1)),
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }
}

/// Submits EVM transfers and contract calls, waiting for each receipt
pub struct EvmSigner {
    rpc: Arc<dyn EvmRpc>,
    explorers: HashMap<u64, String>,
}

impl EvmSigner {
    /// `explorers` maps chain ids to transaction explorer URL prefixes
    pub fn new(rpc: Arc<dyn EvmRpc>, explorers: HashMap<u64, String>) -> Self {
        Self { rpc, explorers }
    }

    pub fn address(&self) -> Address {
        self.rpc.address()
    }

    /// Transfer the native asset or an ERC20 token
    pub async fn transfer(
        &self,
        chain_id: u64,
        to: Address,
        token: Option<Address>,
        amount: U256,
    ) -> SwapResult<TxResult> {
        let tx = match token {
            None => EvmTransaction {
                to,
                data: Bytes::default(),
                value: amount,
                gas_limit: None,
            },
            Some(token) => EvmTransaction {
                to: token,
                data: erc20_call("transfer(address,uint256)", to, amount),
                value: U256::zero(),
                gas_limit: None,
            },
        };
        self.send_and_confirm(chain_id, tx, "transfer").await
    }

    /// Execute a contract call, approving `approval` first when given.
    ///
    /// The main call is only sent after the approval is mined successfully.
    pub async fn execute(
        &self,
        chain_id: u64,
        call: EvmTransaction,
        approval: Option<(Address, U256)>,
    ) -> SwapResult<TxResult> {
        if let Some((token, amount)) = approval {
            let approve = EvmTransaction {
                to: token,
                data: erc20_call("approve(address,uint256)", call.to, amount),
                value: U256::zero(),
                gas_limit: None,
            };
            let approved = self.send_and_confirm(chain_id, approve, "approval").await?;
            debug!("Approval confirmed: {}", approved.transaction_id);
        }

        self.send_and_confirm(chain_id, call, "contract call").await
    }

    async fn send_and_confirm(
        &self,
        chain_id: u64,
        tx: EvmTransaction,
        label: &str,
    ) -> SwapResult<TxResult> {
        let tx_hash = self.rpc.send_transaction(chain_id, tx).await?;
        let tx_id = format!("{:?}", tx_hash);

        let receipt = self
            .rpc
            .wait_for_receipt(chain_id, tx_hash)
            .await
            .map_err(|e| {
                SwapError::upstream(
                    format!("evm:{}", chain_id),
                    format!("{} {} unconfirmed: {}", label, tx_id, e),
                )
            })?;
        crate::metrics::record_chain_tx("evm", receipt.success);

        if !receipt.success {
            return Err(SwapError::tx_failed(
                format!("{} reverted", label),
                Some(tx_id),
            ));
        }

        let explorer = self
            .explorers
            .get(&chain_id)
            .map(String::as_str)
            .unwrap_or_default();
        Ok(TxResult {
            explorer_reference: format!("{}{}", explorer, tx_id),
            transaction_id: tx_id,
        })
    }
}
