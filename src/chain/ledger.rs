//! Ledger-family (XRPL) payments
//!
//! Payments go through a rippled JSON-RPC endpoint: the account sequence, fee and
//! `LastLedgerSequence` are filled from the node, the blob is signed locally by the
//! `LedgerWallet`, and the submission is followed until it lands in a validated
//! ledger or its last ledger passes.

use super::ledger_keys::LedgerWallet;
use crate::config::LedgerConfig;
use crate::error::{SwapError, SwapResult};
use crate::types::TxResult;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "rippled";

/// Engine result code of an applied payment
pub const TES_SUCCESS: &str = "tesSUCCESS";

/// A native-asset payment, amount in drops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub account: String,
    pub destination: String,
    pub amount_drops: u128,
    pub destination_tag: Option<u32>,
}

/// Payment with sequence, fee and last ledger filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPayment {
    pub payment: Payment,
    pub sequence: u32,
    pub fee_drops: u64,
    pub last_ledger_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayment {
    pub tx_blob: String,
    pub hash: String,
    pub last_ledger_sequence: u32,
}

/// Final disposition of a submitted payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutcome {
    pub hash: String,
    pub result_code: String,
    pub validated: bool,
}

/// Ledger node operations used by the signer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn connect(&self) -> SwapResult<()>;
    async fn autofill(&self, payment: &Payment) -> SwapResult<PreparedPayment>;
    async fn submit_and_wait(&self, signed: &SignedPayment) -> SwapResult<LedgerOutcome>;
    async fn disconnect(&self) -> SwapResult<()>;
}

/// rippled JSON-RPC client
pub struct RippledClient {
    http: reqwest::Client,
    config: LedgerConfig,
}

impl RippledClient {
    pub fn new(config: LedgerConfig) -> SwapResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SwapError::upstream(SERVICE, e))?;
        Ok(Self { http, config })
    }

    /// Issue one JSON-RPC call and return its `result` object
    async fn call(&self, method: &str, params: Value) -> SwapResult<Value> {
        let body = json!({ "method": method, "params": [params] });
        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SwapError::upstream(SERVICE, e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SwapError::RateLimited {
                service: SERVICE.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SwapError::upstream(
                SERVICE,
                format!("{} returned HTTP {}", method, response.status()),
            ));
        }

        let mut value: Value = response
            .json()
            .await
            .map_err(|e| SwapError::upstream(SERVICE, e))?;
        let result = value["result"].take();

        if result["status"] == "error" {
            let code = result["error"].as_str().unwrap_or("unknown");
            let message = result["error_message"].as_str().unwrap_or(code);
            return Err(match code {
                "slowDown" => SwapError::RateLimited {
                    service: SERVICE.to_string(),
                },
                _ => SwapError::upstream(SERVICE, format!("{}: {}", method, message)),
            });
        }

        Ok(result)
    }

    async fn validated_ledger_index(&self) -> SwapResult<u32> {
        let result = self
            .call("ledger", json!({ "ledger_index": "validated" }))
            .await?;
        read_u32(&result["ledger_index"])
            .or_else(|| read_u32(&result["ledger"]["ledger_index"]))
            .ok_or_else(|| SwapError::upstream(SERVICE, "ledger response without index"))
    }
}

fn read_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl LedgerRpc for RippledClient {
    async fn connect(&self) -> SwapResult<()> {
        let result = self.call("server_info", json!({})).await?;
        debug!(
            "Connected to {} ({})",
            self.config.rpc_url,
            result["info"]["build_version"].as_str().unwrap_or("unknown version")
        );
        Ok(())
    }

    async fn autofill(&self, payment: &Payment) -> SwapResult<PreparedPayment> {
        let info = self
            .call(
                "account_info",
                json!({ "account": payment.account, "ledger_index": "current" }),
            )
            .await?;
        let sequence = read_u32(&info["account_data"]["Sequence"])
            .ok_or_else(|| SwapError::upstream(SERVICE, "account_info without Sequence"))?;

        let fee = self.call("fee", json!({})).await?;
        let base_fee = fee["drops"]["base_fee"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        let open_ledger_fee = fee["drops"]["open_ledger_fee"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(base_fee);

        let current = self.call("ledger_current", json!({})).await?;
        let current_index = read_u32(&current["ledger_current_index"])
            .ok_or_else(|| SwapError::upstream(SERVICE, "ledger_current without index"))?;
        let last_ledger_sequence = current_index + self.config.last_ledger_offset;

        Ok(PreparedPayment {
            payment: payment.clone(),
            sequence,
            fee_drops: base_fee.max(open_ledger_fee),
            last_ledger_sequence,
        })
    }

    async fn submit_and_wait(&self, signed: &SignedPayment) -> SwapResult<LedgerOutcome> {
        let submitted = self
            .call("submit", json!({ "tx_blob": signed.tx_blob }))
            .await?;
        let engine_result = submitted["engine_result"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        debug!("Submitted {}: preliminary {}", signed.hash, engine_result);

        // Malformed, locally failed and fee-rejected payments never reach a ledger
        if ["tem", "tef", "tel"].iter().any(|p| engine_result.starts_with(p)) {
            return Ok(LedgerOutcome {
                hash: signed.hash.clone(),
                result_code: engine_result,
                validated: false,
            });
        }

        let poll = Duration::from_millis(self.config.validation_poll_ms);
        loop {
            tokio::time::sleep(poll).await;

            match self.call("tx", json!({ "transaction": signed.hash })).await {
                Ok(tx) if tx["validated"] == true => {
                    let code = tx["meta"]["TransactionResult"]
                        .as_str()
                        .unwrap_or("unknown")
                        .to_string();
                    return Ok(LedgerOutcome {
                        hash: signed.hash.clone(),
                        result_code: code,
                        validated: true,
                    });
                }
                Ok(_) => {}
                Err(SwapError::Upstream { message, .. }) if message.contains("not found") => {}
                Err(e) => return Err(e),
            }

            if self.validated_ledger_index().await? > signed.last_ledger_sequence {
                return Ok(LedgerOutcome {
                    hash: signed.hash.clone(),
                    result_code: "tefMAX_LEDGER".to_string(),
                    validated: false,
                });
            }
        }
    }

    async fn disconnect(&self) -> SwapResult<()> {
        // JSON-RPC over HTTP keeps no session
        Ok(())
    }
}

/// Signs and submits payments for the wallet's account
pub struct LedgerSigner {
    rpc: Arc<dyn LedgerRpc>,
    wallet: LedgerWallet,
    explorer_tx_url: String,
}

impl LedgerSigner {
    pub fn new(rpc: Arc<dyn LedgerRpc>, wallet: LedgerWallet, explorer_tx_url: impl Into<String>) -> Self {
        Self {
            rpc,
            wallet,
            explorer_tx_url: explorer_tx_url.into(),
        }
    }

    pub fn account(&self) -> &str {
        self.wallet.address()
    }

    /// Pay `amount_drops` to `destination` and wait for validation
    pub async fn pay(
        &self,
        destination: &str,
        amount_drops: u128,
        destination_tag: Option<u32>,
    ) -> SwapResult<TxResult> {
        let payment = Payment {
            account: self.account().to_string(),
            destination: destination.to_string(),
            amount_drops,
            destination_tag,
        };

        self.rpc.connect().await?;
        let result = self.submit(&payment).await;
        if let Err(e) = self.rpc.disconnect().await {
            warn!("Ledger disconnect failed: {}", e);
        }
        result
    }

    async fn submit(&self, payment: &Payment) -> SwapResult<TxResult> {
        let prepared = self.rpc.autofill(payment).await?;
        let signed = self.wallet.sign(&prepared)?;
        info!(
            "Submitting ledger payment {} of {} drops to {}",
            signed.hash, payment.amount_drops, payment.destination
        );

        let outcome = self.rpc.submit_and_wait(&signed).await?;
        crate::metrics::record_chain_tx("ledger", outcome.result_code == TES_SUCCESS);

        if outcome.result_code != TES_SUCCESS {
            return Err(SwapError::tx_failed(outcome.result_code, Some(outcome.hash)));
        }

        Ok(TxResult {
            explorer_reference: format!("{}{}", self.explorer_tx_url, outcome.hash),
            transaction_id: outcome.hash,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::ledger_keys::encode_address;

    /// Well-known genesis account seed
    pub(crate) const SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTb";

    pub(crate) fn deposit_address() -> String {
        encode_address(&[0x42; 20])
    }

    pub(crate) fn autofilled(payment: &Payment) -> SwapResult<PreparedPayment> {
        Ok(PreparedPayment {
            payment: payment.clone(),
            sequence: 7,
            fee_drops: 12,
            last_ledger_sequence: 120,
        })
    }

    fn signer(rpc: MockLedgerRpc) -> LedgerSigner {
        LedgerSigner::new(
            Arc::new(rpc),
            LedgerWallet::from_seed(SEED).unwrap(),
            "https://livenet.xrpl.org/transactions/",
        )
    }

    #[tokio::test]
    async fn test_successful_payment_is_signed_locally() {
        let signer_account = LedgerWallet::from_seed(SEED).unwrap().address().to_string();
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_connect().times(1).returning(|| Ok(()));
        rpc.expect_autofill()
            .withf(move |p| {
                p.account == signer_account
                    && p.destination == deposit_address()
                    && p.amount_drops == 2_000_000
            })
            .returning(autofilled);
        rpc.expect_submit_and_wait()
            .withf(|s| s.tx_blob.starts_with("120000") && s.hash.len() == 64 && s.last_ledger_sequence == 120)
            .returning(|s| {
                Ok(LedgerOutcome {
                    hash: s.hash.clone(),
                    result_code: TES_SUCCESS.to_string(),
                    validated: true,
                })
            });
        rpc.expect_disconnect().times(1).returning(|| Ok(()));

        let result = signer(rpc)
            .pay(&deposit_address(), 2_000_000, None)
            .await
            .unwrap();
        assert_eq!(result.transaction_id.len(), 64);
        assert_eq!(
            result.explorer_reference,
            format!("https://livenet.xrpl.org/transactions/{}", result.transaction_id)
        );
    }

    #[tokio::test]
    async fn test_failed_payment_carries_code_and_disconnects() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_connect().returning(|| Ok(()));
        rpc.expect_autofill().returning(autofilled);
        rpc.expect_submit_and_wait().returning(|_| {
            Ok(LedgerOutcome {
                hash: "ABC123".to_string(),
                result_code: "tecUNFUNDED_PAYMENT".to_string(),
                validated: true,
            })
        });
        rpc.expect_disconnect().times(1).returning(|| Ok(()));

        let err = signer(rpc)
            .pay(&deposit_address(), 2_000_000, None)
            .await
            .unwrap_err();
        match err {
            SwapError::TransactionFailed { reason, tx_id } => {
                assert_eq!(reason, "tecUNFUNDED_PAYMENT");
                assert_eq!(tx_id.as_deref(), Some("ABC123"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnects_when_destination_is_invalid() {
        let mut rpc = MockLedgerRpc::new();
        rpc.expect_connect().returning(|| Ok(()));
        rpc.expect_autofill().returning(autofilled);
        rpc.expect_submit_and_wait().never();
        rpc.expect_disconnect().times(1).returning(|| Ok(()));

        let err = signer(rpc).pay("rDeposit", 1, None).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_account_comes_from_seed() {
        let signer = signer(MockLedgerRpc::new());
        assert_eq!(signer.account(), "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh");
    }
}
