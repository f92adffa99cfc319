//! Chain module - signs and submits origin-chain transactions
//!
//! This module provides:
//! - Ledger-family (XRPL) payments signed locally and submitted through a rippled node
//! - EVM transfers and contract calls with multi-RPC failover
//! - `ChainSigner`, which routes a request to the right family by chain name
//!
//! A family without key material is still routable; requests to it fail with
//! `SigningUnavailable` before anything is sent.

pub mod evm;
pub mod ledger;
pub mod ledger_keys;
pub mod provider;

pub use evm::{EthersEvmClient, EvmRpc, EvmSigner, EvmTransaction};
pub use ledger::{LedgerRpc, LedgerSigner, RippledClient};
pub use ledger_keys::LedgerWallet;
pub use provider::{EvmProvider, GasPrice};

use crate::config::{KeyMaterial, Settings};
use crate::error::{SwapError, SwapResult};
use crate::types::{Asset, TxResult};

use ethers::types::{Address, Bytes, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Ledger,
    Evm,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Ledger => "ledger",
            ChainFamily::Evm => "evm",
        }
    }
}

/// A configured chain resolved from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTarget {
    Ledger,
    Evm { chain_id: u64 },
}

impl ChainTarget {
    pub fn family(&self) -> ChainFamily {
        match self {
            ChainTarget::Ledger => ChainFamily::Ledger,
            ChainTarget::Evm { .. } => ChainFamily::Evm,
        }
    }
}

/// Send `amount` of `asset` on `chain` to `destination`
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub chain: String,
    pub destination: String,
    pub asset: Asset,
    /// Smallest units
    pub amount: u128,
    /// Memo required by the receiving account, if any
    pub memo: Option<String>,
}

/// Token allowance granted to the call target before a contract call
#[derive(Debug, Clone, PartialEq)]
pub struct TokenApproval {
    pub token: String,
    pub amount: u128,
}

/// A prepared contract call as returned by a routing backend
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCallRequest {
    pub chain: String,
    pub target: String,
    /// Hex calldata
    pub data: String,
    /// Native value in wei, decimal
    pub value: String,
    pub gas_limit: Option<String>,
    pub approval: Option<TokenApproval>,
}

fn parse_address(value: &str, what: &str) -> SwapResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| SwapError::InvalidRequest(format!("invalid {} address {:?}: {}", what, value, e)))
}

fn parse_u256(value: &str, what: &str) -> SwapResult<U256> {
    if value.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(value)
        .map_err(|e| SwapError::InvalidRequest(format!("invalid {} {:?}: {}", what, value, e)))
}

/// Routes transfers and contract calls to the ledger or EVM signer
pub struct ChainSigner {
    ledger_name: String,
    evm_chains: HashMap<String, u64>,
    ledger: Option<LedgerSigner>,
    evm: Option<EvmSigner>,
}

impl ChainSigner {
    pub fn new(
        ledger_name: impl Into<String>,
        evm_chains: HashMap<String, u64>,
        ledger: Option<LedgerSigner>,
        evm: Option<EvmSigner>,
    ) -> Self {
        Self {
            ledger_name: ledger_name.into(),
            evm_chains,
            ledger,
            evm,
        }
    }

    /// Build signers for every family that has key material configured
    pub fn from_settings(settings: &Settings, keys: &KeyMaterial) -> SwapResult<Self> {
        let ledger = match keys.ledger_seed() {
            Some(seed) => {
                let wallet = LedgerWallet::from_seed(seed)?;
                let client = RippledClient::new(settings.ledger.clone())?;
                info!("Ledger signer enabled for {}", wallet.address());
                Some(LedgerSigner::new(
                    Arc::new(client),
                    wallet,
                    settings.ledger.explorer_tx_url.clone(),
                ))
            }
            None => {
                warn!("No ledger seed configured - ledger signing unavailable");
                None
            }
        };

        let evm = match keys.evm_private_key() {
            Some(key) => {
                let client = EthersEvmClient::new(&settings.evm, &key)?;
                let explorers = settings
                    .evm
                    .values()
                    .map(|c| (c.chain_id, c.explorer_tx_url.clone()))
                    .collect();
                Some(EvmSigner::new(Arc::new(client), explorers))
            }
            None => None,
        };

        let evm_chains = settings
            .evm
            .iter()
            .map(|(name, c)| (name.clone(), c.chain_id))
            .collect();

        Ok(Self::new(settings.ledger.name.clone(), evm_chains, ledger, evm))
    }

    /// Resolve a chain name to its family
    pub fn resolve(&self, chain: &str) -> SwapResult<ChainTarget> {
        if chain == self.ledger_name {
            return Ok(ChainTarget::Ledger);
        }
        self.evm_chains
            .get(chain)
            .map(|&chain_id| ChainTarget::Evm { chain_id })
            .ok_or_else(|| SwapError::ConfigurationMissing(format!("chain {} is not configured", chain)))
    }

    /// EVM chain id for a chain name
    pub fn evm_chain_id(&self, chain: &str) -> SwapResult<u64> {
        match self.resolve(chain)? {
            ChainTarget::Evm { chain_id } => Ok(chain_id),
            ChainTarget::Ledger => Err(SwapError::InvalidRequest(format!(
                "{} is not an EVM chain",
                chain
            ))),
        }
    }

    pub fn evm_address(&self) -> Option<String> {
        self.evm
            .as_ref()
            .map(|e| ethers::utils::to_checksum(&e.address(), None))
    }

    pub fn ledger_address(&self) -> Option<String> {
        self.ledger.as_ref().map(|l| l.account().to_string())
    }

    /// Signing address for a chain, if its family has key material
    pub fn address_for(&self, chain: &str) -> SwapResult<Option<String>> {
        Ok(match self.resolve(chain)?.family() {
            ChainFamily::Ledger => self.ledger_address(),
            ChainFamily::Evm => self.evm_address(),
        })
    }

    /// Fails when `chain` is unknown or its family has no key material
    pub fn ensure_signing(&self, chain: &str) -> SwapResult<()> {
        match self.resolve(chain)?.family() {
            ChainFamily::Ledger => self.ledger_signer().map(|_| ()),
            ChainFamily::Evm => self.evm_signer().map(|_| ()),
        }
    }

    fn ledger_signer(&self) -> SwapResult<&LedgerSigner> {
        self.ledger.as_ref().ok_or_else(|| SwapError::SigningUnavailable {
            family: ChainFamily::Ledger.as_str().to_string(),
        })
    }

    fn evm_signer(&self) -> SwapResult<&EvmSigner> {
        self.evm.as_ref().ok_or_else(|| SwapError::SigningUnavailable {
            family: ChainFamily::Evm.as_str().to_string(),
        })
    }

    /// Send a transfer and wait for it to be final on its chain
    pub async fn transfer(&self, request: &TransferRequest) -> SwapResult<TxResult> {
        match self.resolve(&request.chain)? {
            ChainTarget::Ledger => {
                let signer = self.ledger_signer()?;
                if !request.asset.is_native() {
                    return Err(SwapError::InvalidRequest(format!(
                        "issued currency {} is not supported on {}",
                        request.asset.id, request.chain
                    )));
                }
                let tag = match &request.memo {
                    Some(memo) => Some(memo.parse::<u32>().map_err(|_| {
                        SwapError::InvalidRequest(format!("memo {:?} is not a destination tag", memo))
                    })?),
                    None => None,
                };
                signer.pay(&request.destination, request.amount, tag).await
            }
            ChainTarget::Evm { chain_id } => {
                let signer = self.evm_signer()?;
                let to = parse_address(&request.destination, "destination")?;
                let token = request
                    .asset
                    .token
                    .as_deref()
                    .map(|t| parse_address(t, "token"))
                    .transpose()?;
                signer
                    .transfer(chain_id, to, token, U256::from(request.amount))
                    .await
            }
        }
    }

    /// Execute a prepared EVM contract call, approving the token first when asked
    pub async fn execute_call(&self, request: &ContractCallRequest) -> SwapResult<TxResult> {
        let chain_id = self.evm_chain_id(&request.chain)?;
        let signer = self.evm_signer()?;

        let call = EvmTransaction {
            to: parse_address(&request.target, "call target")?,
            data: request
                .data
                .parse::<Bytes>()
                .map_err(|e| SwapError::InvalidRequest(format!("invalid calldata: {}", e)))?,
            value: parse_u256(&request.value, "value")?,
            gas_limit: request
                .gas_limit
                .as_deref()
                .map(|g| parse_u256(g, "gas limit"))
                .transpose()?,
        };
        let approval = request
            .approval
            .as_ref()
            .map(|a| Ok::<_, SwapError>((parse_address(&a.token, "token")?, U256::from(a.amount))))
            .transpose()?;

        signer.execute(chain_id, call, approval).await
    }
}
