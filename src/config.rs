//! Configuration management for the swap orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Key material is never stored in the file itself; the file names the environment
//! variables that hold it and `KeyMaterial::from_env` reads them once at start.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub wallet: WalletConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub evm: HashMap<String, EvmChainConfig>,
    pub providers: ProvidersConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_attempts() -> u32 {
    20
}

fn default_rate_limit_backoff_ms() -> u64 {
    3_000
}

fn default_rate_limit_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex EVM private key
    pub evm_private_key_env: Option<String>,
    /// Environment variable holding the ledger family seed; the account is derived from it
    pub ledger_seed_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Chain name used in swap intents (e.g. "xrpl")
    pub name: String,
    pub rpc_url: String,
    pub explorer_tx_url: String,
    /// Ledgers after the current one before an unvalidated payment is abandoned
    #[serde(default = "default_ledger_offset")]
    pub last_ledger_offset: u32,
    #[serde(default = "default_validation_poll_ms")]
    pub validation_poll_ms: u64,
}

fn default_ledger_offset() -> u32 {
    20
}

fn default_validation_poll_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub explorer_tx_url: String,
    #[serde(default = "default_gas_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_gas_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Eip1559
}

fn default_confirmation_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub one_click: Option<OneClickConfig>,
    pub fusion_plus: Option<FusionPlusConfig>,
    pub squid: Option<SquidConfig>,
}

/// Minimum amount for one (chain, asset) pair, in the asset's smallest unit
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MinimumAmount {
    pub chain: String,
    pub asset: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: u128,
}

/// TOML integers stop at i64; larger amounts are written as decimal strings
fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Integer(u64),
        Decimal(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Integer(value) => Ok(u128::from(value)),
        Raw::Decimal(value) => value
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount {:?}", value))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneClickConfig {
    pub base_url: String,
    pub jwt: Option<String>,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_one_click_deadline_secs")]
    pub deadline_secs: i64,
    #[serde(default = "default_quote_waiting_time_ms")]
    pub quote_waiting_time_ms: u64,
    #[serde(default = "default_referral")]
    pub referral: String,
    #[serde(default)]
    pub minimums: Vec<MinimumAmount>,
    pub max_poll_attempts: Option<u32>,
}

fn default_slippage_bps() -> u32 {
    100
}

fn default_one_click_deadline_secs() -> i64 {
    180
}

fn default_quote_waiting_time_ms() -> u64 {
    3_000
}

fn default_referral() -> String {
    "referral".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionPlusConfig {
    pub base_url: String,
    pub auth_key: Option<String>,
    #[serde(default = "default_fusion_source")]
    pub source: String,
    #[serde(default = "default_fusion_quote_ttl_secs")]
    pub quote_ttl_secs: i64,
    #[serde(default)]
    pub minimums: Vec<MinimumAmount>,
    /// Escrow orders terminate on their own expiry; `None` polls until then
    pub max_poll_attempts: Option<u32>,
}

fn default_fusion_source() -> String {
    "swap-orchestrator".to_string()
}

fn default_fusion_quote_ttl_secs() -> i64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquidConfig {
    pub base_url: String,
    pub integrator_id: String,
    #[serde(default = "default_squid_quote_ttl_secs")]
    pub quote_ttl_secs: i64,
    #[serde(default)]
    pub minimums: Vec<MinimumAmount>,
    pub max_poll_attempts: Option<u32>,
    #[serde(default = "default_squid_explorer")]
    pub explorer_url: String,
}

fn default_squid_quote_ttl_secs() -> i64 {
    120
}

fn default_squid_explorer() -> String {
    "https://axelarscan.io/gmp/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.engine.poll_interval_ms == 0 {
            anyhow::bail!("engine.poll_interval_ms must be greater than zero");
        }

        if self.engine.max_poll_attempts == 0 {
            anyhow::bail!("engine.max_poll_attempts must be greater than zero");
        }

        let p = &self.providers;
        if p.one_click.is_none() && p.fusion_plus.is_none() && p.squid.is_none() {
            anyhow::bail!("At least one provider must be configured");
        }

        for (name, chain) in &self.evm {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("EVM chain {} has no RPC URLs configured", name);
            }
            if name == &self.ledger.name {
                anyhow::bail!("EVM chain name {} collides with the ledger chain name", name);
            }
        }

        if self.wallet.evm_private_key_env.is_none() {
            tracing::warn!("No EVM key configured - EVM signing will be unavailable");
        }

        Ok(())
    }

    /// Get EVM chain config by chain ID
    pub fn get_evm_by_id(&self, chain_id: u64) -> Option<(&String, &EvmChainConfig)> {
        self.evm.iter().find(|(_, c)| c.chain_id == chain_id)
    }
}

/// Key material read once at process start; read-only afterwards
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    evm_private_key: Option<String>,
    ledger_seed: Option<String>,
}

impl KeyMaterial {
    /// Create key material from explicit values
    pub fn new(evm_private_key: Option<String>, ledger_seed: Option<String>) -> Self {
        Self {
            evm_private_key: evm_private_key.filter(|k| !k.trim().is_empty()),
            ledger_seed: ledger_seed.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Read key material from the environment variables named by the wallet config
    pub fn from_env(wallet: &WalletConfig) -> Self {
        let read = |name: &Option<String>| name.as_ref().and_then(|n| env::var(n).ok());
        Self::new(
            read(&wallet.evm_private_key_env),
            read(&wallet.ledger_seed_env),
        )
    }

    /// EVM private key, normalized to a 0x prefix
    pub fn evm_private_key(&self) -> Option<String> {
        self.evm_private_key.as_ref().map(|key| {
            let key = key.trim();
            if key.starts_with("0x") {
                key.to_string()
            } else {
                format!("0x{}", key)
            }
        })
    }

    pub fn ledger_seed(&self) -> Option<&str> {
        self.ledger_seed.as_deref()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("evm_private_key", &self.evm_private_key.as_ref().map(|_| "[REDACTED]"))
            .field("ledger_seed", &self.ledger_seed.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: Option<regex::Regex> =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").ok();
    }

    let Some(pattern) = ENV_VAR.as_ref() else {
        return input.to_string();
    };

    let mut result = input.to_string();
    for cap in pattern.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
