//! Fusion+ REST client with local order signing

use super::order::{maker_traits, salt_for, EscrowParams, LimitOrder, TraitFlags, TRUE_ERC20};
use super::{
    FusionApi, FusionOrderStatus, FusionQuote, FusionQuoteParams, OrderParams, PreparedOrder,
    ReadyFill,
};
use crate::config::FusionPlusConfig;
use crate::error::{SwapError, SwapResult};
use crate::providers::http::{decode, ApiClient};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const SERVICE: &str = "fusion_plus";

#[derive(Debug, Deserialize)]
struct ReadyFillsResponse {
    #[serde(default)]
    fills: Vec<ReadyFill>,
}

/// HTTP client for the Fusion+ quoter, relayer and orders APIs
pub struct FusionHttp {
    client: ApiClient,
    wallet: Option<LocalWallet>,
}

impl FusionHttp {
    /// `wallet` signs orders; without it order creation is unavailable
    pub fn new(config: &FusionPlusConfig, wallet: Option<LocalWallet>) -> SwapResult<Self> {
        Ok(Self {
            client: ApiClient::new(SERVICE, &config.base_url, config.auth_key.as_deref(), &[])?,
            wallet,
        })
    }

    /// Parse an EVM private key into an order-signing wallet
    pub fn wallet_from_key(private_key: &str) -> SwapResult<LocalWallet> {
        private_key
            .parse::<LocalWallet>()
            .map_err(|e| SwapError::ConfigurationMissing(format!("invalid EVM private key: {}", e)))
    }

    fn wallet(&self) -> SwapResult<&LocalWallet> {
        self.wallet.as_ref().ok_or_else(|| SwapError::SigningUnavailable {
            family: "evm".to_string(),
        })
    }
}

fn parse_address(value: &str, what: &str) -> SwapResult<Address> {
    value
        .parse()
        .map_err(|_| SwapError::InvalidRequest(format!("invalid {} address: {}", what, value)))
}

fn parse_hash(value: &str) -> SwapResult<[u8; 32]> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| SwapError::InvalidRequest(format!("invalid hash lock: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| SwapError::InvalidRequest("hash lock must be 32 bytes".to_string()))
}

fn parse_amount(value: Option<&str>, what: &str) -> SwapResult<U256> {
    match value {
        None => Ok(U256::zero()),
        Some(v) => U256::from_dec_str(v)
            .map_err(|_| SwapError::upstream(SERVICE, format!("quote has invalid {}: {}", what, v))),
    }
}

#[async_trait]
impl FusionApi for FusionHttp {
    fn maker_address(&self) -> Option<String> {
        self.wallet.as_ref().map(|w| format!("{:?}", w.address()))
    }

    async fn quote(&self, params: &FusionQuoteParams) -> SwapResult<FusionQuote> {
        debug!(
            "Requesting Fusion+ quote {} -> {} for {}",
            params.src_chain_id, params.dst_chain_id, params.amount
        );
        let request = self.client.get("/quoter/v1.0/quote/receive").query(&[
            ("srcChain", params.src_chain_id.to_string()),
            ("dstChain", params.dst_chain_id.to_string()),
            ("srcTokenAddress", params.src_token.clone()),
            ("dstTokenAddress", params.dst_token.clone()),
            ("amount", params.amount.clone()),
            ("walletAddress", params.wallet_address.clone()),
            ("enableEstimate", "true".to_string()),
        ]);
        let response = self.client.send_ok(request).await?;
        decode(SERVICE, response.body)
    }

    async fn create_order(
        &self,
        quote: &FusionQuote,
        params: &OrderParams,
    ) -> SwapResult<PreparedOrder> {
        let wallet = self.wallet()?;
        let maker = parse_address(&params.wallet_address, "wallet")?;
        if maker != wallet.address() {
            return Err(SwapError::InvalidRequest(format!(
                "order maker {} is not the configured wallet",
                params.wallet_address
            )));
        }

        let preset = quote.preset(&params.preset).ok_or_else(|| {
            SwapError::InvalidRequest(format!("quote has no {} preset", params.preset))
        })?;
        let quote_id = quote
            .quote_id
            .clone()
            .ok_or_else(|| SwapError::upstream(SERVICE, "quote has no quoteId"))?;
        let factory = quote
            .src_escrow_factory
            .as_deref()
            .ok_or_else(|| SwapError::upstream(SERVICE, "quote has no escrow factory"))?;

        let escrow = EscrowParams {
            escrow_factory: parse_address(factory, "escrow factory")?,
            hash_lock: parse_hash(&params.hash_lock)?,
            dst_chain_id: params.dst_chain_id,
            dst_token: parse_address(&params.dst_token, "destination token")?,
            src_safety_deposit: parse_amount(quote.src_safety_deposit.as_deref(), "srcSafetyDeposit")?,
            dst_safety_deposit: parse_amount(quote.dst_safety_deposit.as_deref(), "dstSafetyDeposit")?,
            time_locks: quote.time_locks.unwrap_or_default(),
        };
        let extension = escrow.extension();

        let mut random = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random);
        let salt = salt_for(&extension, U256::from_big_endian(&random));

        let taking_amount = preset
            .auction_end_amount
            .clone()
            .unwrap_or_else(|| quote.dst_token_amount.clone());

        let order = LimitOrder {
            salt: salt.to_string(),
            maker: format!("{:?}", maker),
            receiver: format!("{:?}", Address::zero()),
            maker_asset: params.src_token.clone(),
            taker_asset: TRUE_ERC20.to_string(),
            making_amount: params.amount.clone(),
            taking_amount,
            maker_traits: maker_traits(TraitFlags {
                allow_partial_fills: preset.allow_partial_fills,
                allow_multiple_fills: preset.allow_multiple_fills,
                expiration: 0,
                nonce: 0,
            })
            .to_string(),
        };

        let signature = wallet
            .sign_typed_data(&order.typed_data(params.src_chain_id)?)
            .await
            .map_err(|e| SwapError::ConfigurationMissing(format!("order signing failed: {}", e)))?;

        let hash = format!("{:?}", order.typed_data_hash(params.src_chain_id)?);
        info!("Created Fusion+ order {} ({} preset)", hash, params.preset);

        Ok(PreparedOrder {
            hash,
            quote_id,
            src_chain_id: params.src_chain_id,
            order,
            extension: format!("0x{}", hex::encode(&extension)),
            signature: format!("0x{}", hex::encode(signature.to_vec())),
        })
    }

    async fn submit_order(
        &self,
        src_chain_id: u64,
        order: &PreparedOrder,
        quote_id: &str,
        secret_hashes: &[String],
    ) -> SwapResult<Value> {
        let mut body = json!({
            "order": order.order,
            "srcChainId": src_chain_id,
            "signature": order.signature,
            "extension": order.extension,
            "quoteId": quote_id,
        });
        if secret_hashes.len() > 1 {
            body["secretHashes"] = json!(secret_hashes);
        }

        let response = self
            .client
            .send_ok(self.client.post("/relayer/v1.0/submit").json(&body))
            .await?;
        info!("Submitted Fusion+ order {} to relayer", order.hash);
        Ok(response.body)
    }

    async fn ready_fills(&self, order_hash: &str) -> SwapResult<Vec<ReadyFill>> {
        let path = format!(
            "/orders/v1.0/order/ready-to-accept-secret-fills/{}",
            order_hash
        );
        let response = self.client.send_ok(self.client.get(&path)).await?;
        let parsed: ReadyFillsResponse = decode(SERVICE, response.body)?;
        Ok(parsed.fills)
    }

    async fn submit_secret(&self, order_hash: &str, secret: &str) -> SwapResult<()> {
        let body = json!({ "secret": secret, "orderHash": order_hash });
        self.client
            .send_ok(self.client.post("/relayer/v1.0/submit/secret").json(&body))
            .await?;
        Ok(())
    }

    async fn order_status(&self, order_hash: &str) -> SwapResult<FusionOrderStatus> {
        let path = format!("/orders/v1.0/order/status/{}", order_hash);
        let response = self.client.send(self.client.get(&path)).await?;
        if response.is_not_found() {
            return Ok(FusionOrderStatus::not_found());
        }
        decode(SERVICE, response.body)
    }
}
