//! Escrow order construction and EIP-712 hashing
//!
//! Orders follow the limit order protocol v4 layout. The cross-chain escrow
//! parameters (hash lock, destination chain and token, safety deposits, time locks)
//! travel in the order extension after the escrow factory address; the extension
//! hash is bound into the low 160 bits of the salt.

use crate::error::{SwapError, SwapResult};
use crate::secrets::merkle::{keccak256, Hash32};

use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Limit order protocol v4, same address on every supported chain
pub const LIMIT_ORDER_PROTOCOL: &str = "0x111111125421ca6dc452d289314280a0f8842a65";

/// Source-chain taker asset placeholder for cross-chain orders
pub const TRUE_ERC20: &str = "0xda0000d4000015a526378bb6fafc650cea5966f8";

const DOMAIN_NAME: &str = "1inch Aggregation Router";
const DOMAIN_VERSION: &str = "6";

// Maker traits flags
const NO_PARTIAL_FILLS_FLAG: usize = 255;
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;
const EXPIRATION_OFFSET: usize = 80;
const NONCE_OFFSET: usize = 120;
const UINT40_MAX: u64 = (1 << 40) - 1;

/// Escrow time locks in seconds relative to deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLocks {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl TimeLocks {
    /// Pack the seven stages as consecutive 32-bit words, source withdrawal lowest
    pub fn pack(&self) -> U256 {
        [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ]
        .iter()
        .enumerate()
        .fold(U256::zero(), |acc, (i, v)| acc | (U256::from(*v) << (32 * i)))
    }
}

/// Cross-chain parameters carried in the order extension
#[derive(Debug, Clone, PartialEq)]
pub struct EscrowParams {
    pub escrow_factory: Address,
    pub hash_lock: Hash32,
    pub dst_chain_id: u64,
    pub dst_token: Address,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub time_locks: TimeLocks,
}

impl EscrowParams {
    /// Factory address followed by the ABI-encoded escrow parameters
    pub fn extension(&self) -> Bytes {
        let deposits = (self.src_safety_deposit << 128) | self.dst_safety_deposit;
        let mut out = self.escrow_factory.as_bytes().to_vec();
        out.extend(encode(&[
            Token::FixedBytes(self.hash_lock.to_vec()),
            Token::Uint(U256::from(self.dst_chain_id)),
            Token::Address(self.dst_token),
            Token::Uint(deposits),
            Token::Uint(self.time_locks.pack()),
        ]));
        out.into()
    }
}

/// Fill policy of an order, derived from the auction preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraitFlags {
    pub allow_partial_fills: bool,
    pub allow_multiple_fills: bool,
    /// Unix seconds; zero means no expiration
    pub expiration: u64,
    pub nonce: u64,
}

/// Encode maker traits for an order with an escrow extension
pub fn maker_traits(flags: TraitFlags) -> U256 {
    let mut traits = U256::zero();
    if !flags.allow_partial_fills {
        traits |= U256::one() << NO_PARTIAL_FILLS_FLAG;
    }
    if flags.allow_multiple_fills {
        traits |= U256::one() << ALLOW_MULTIPLE_FILLS_FLAG;
    }
    traits |= U256::one() << POST_INTERACTION_CALL_FLAG;
    traits |= U256::one() << HAS_EXTENSION_FLAG;
    traits |= U256::from(flags.expiration & UINT40_MAX) << EXPIRATION_OFFSET;
    traits |= U256::from(flags.nonce & UINT40_MAX) << NONCE_OFFSET;
    traits
}

/// Salt whose low 160 bits commit to the extension
pub fn salt_for(extension: &[u8], random: U256) -> U256 {
    let ext_hash = U256::from_big_endian(&keccak256(extension));
    let low_mask = (U256::one() << 160) - 1;
    (random & !low_mask) | (ext_hash & low_mask)
}

/// Wire form of a limit order; amounts and salt are decimal strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrder {
    pub salt: String,
    pub maker: String,
    pub receiver: String,
    pub maker_asset: String,
    pub taker_asset: String,
    pub making_amount: String,
    pub taking_amount: String,
    pub maker_traits: String,
}

impl LimitOrder {
    /// EIP-712 payload the maker signs on `chain_id`
    pub fn typed_data(&self, chain_id: u64) -> SwapResult<TypedData> {
        let payload = json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" },
                ],
                "Order": [
                    { "name": "salt", "type": "uint256" },
                    { "name": "maker", "type": "address" },
                    { "name": "receiver", "type": "address" },
                    { "name": "makerAsset", "type": "address" },
                    { "name": "takerAsset", "type": "address" },
                    { "name": "makingAmount", "type": "uint256" },
                    { "name": "takingAmount", "type": "uint256" },
                    { "name": "makerTraits", "type": "uint256" },
                ],
            },
            "primaryType": "Order",
            "domain": {
                "name": DOMAIN_NAME,
                "version": DOMAIN_VERSION,
                "chainId": chain_id,
                "verifyingContract": LIMIT_ORDER_PROTOCOL,
            },
            "message": self,
        });
        serde_json::from_value(payload)
            .map_err(|e| SwapError::InvalidRequest(format!("order is not valid typed data: {}", e)))
    }

    /// Digest of [`Self::typed_data`]
    pub fn typed_data_hash(&self, chain_id: u64) -> SwapResult<H256> {
        let digest = self
            .typed_data(chain_id)?
            .encode_eip712()
            .map_err(|e| SwapError::InvalidRequest(format!("order cannot be hashed: {}", e)))?;
        Ok(H256::from(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    fn order(maker: Address) -> LimitOrder {
        LimitOrder {
            salt: "12345".to_string(),
            maker: format!("{:?}", maker),
            receiver: format!("{:?}", Address::zero()),
            maker_asset: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
            taker_asset: TRUE_ERC20.to_string(),
            making_amount: "5000000".to_string(),
            taking_amount: "4900000".to_string(),
            maker_traits: maker_traits(TraitFlags::default()).to_string(),
        }
    }

    #[test]
    fn test_time_locks_pack() {
        let locks = TimeLocks {
            src_withdrawal: 1,
            dst_cancellation: 7,
            ..Default::default()
        };
        let packed = locks.pack();
        assert_eq!(packed.low_u32(), 1);
        assert_eq!((packed >> 192).low_u32(), 7);
    }

    #[test]
    fn test_maker_traits_flags() {
        let traits = maker_traits(TraitFlags {
            allow_partial_fills: true,
            allow_multiple_fills: true,
            expiration: 1_700_000_000,
            nonce: 3,
        });
        assert!(!traits.bit(NO_PARTIAL_FILLS_FLAG));
        assert!(traits.bit(ALLOW_MULTIPLE_FILLS_FLAG));
        assert!(traits.bit(HAS_EXTENSION_FLAG));
        assert_eq!(((traits >> EXPIRATION_OFFSET) & U256::from(UINT40_MAX)).as_u64(), 1_700_000_000);
        assert_eq!(((traits >> NONCE_OFFSET) & U256::from(UINT40_MAX)).as_u64(), 3);

        let single = maker_traits(TraitFlags::default());
        assert!(single.bit(NO_PARTIAL_FILLS_FLAG));
        assert!(!single.bit(ALLOW_MULTIPLE_FILLS_FLAG));
    }

    #[test]
    fn test_salt_commits_to_extension() {
        let params = EscrowParams {
            escrow_factory: Address::from_low_u64_be(0xfac),
            hash_lock: [7u8; 32],
            dst_chain_id: 42161,
            dst_token: Address::from_low_u64_be(0xd57),
            src_safety_deposit: U256::from(100),
            dst_safety_deposit: U256::from(200),
            time_locks: TimeLocks::default(),
        };
        let extension = params.extension();
        assert_eq!(&extension[..20], params.escrow_factory.as_bytes());
        assert_eq!(extension.len(), 20 + 5 * 32);

        let random = U256::MAX;
        let salt = salt_for(&extension, random);
        let low_mask = (U256::one() << 160) - 1;
        assert_eq!(salt & low_mask, U256::from_big_endian(&keccak256(&extension)) & low_mask);
        assert_eq!(salt >> 160, random >> 160);
    }

    #[tokio::test]
    async fn test_signature_recovers_maker() {
        let wallet: LocalWallet = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            .parse()
            .unwrap();
        let order = order(wallet.address());

        let digest = order.typed_data_hash(8453).unwrap();
        assert_ne!(digest, order.typed_data_hash(1).unwrap());

        let signature = wallet.sign_typed_data(&order.typed_data(8453).unwrap()).await.unwrap();
        assert_eq!(signature.recover(digest).unwrap(), wallet.address());
    }

    #[test]
    fn test_domain_binds_protocol_contract() {
        let typed = order(Address::zero()).typed_data(1).unwrap();
        assert_eq!(typed.primary_type, "Order");
        assert_eq!(typed.domain.name.as_deref(), Some(DOMAIN_NAME));
        assert_eq!(
            typed.domain.verifying_contract,
            Some(LIMIT_ORDER_PROTOCOL.parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_order_field() {
        let mut bad = order(Address::zero());
        bad.making_amount = "1.5".to_string();
        assert!(bad.typed_data_hash(1).is_err());

        let mut bad = order(Address::zero());
        bad.maker = "not-an-address".to_string();
        assert!(bad.typed_data_hash(1).is_err());
    }
}
