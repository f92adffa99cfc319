//! Ledger-family keys and local transaction signing
//!
//! A family seed decodes to 16 bytes of entropy. secp256k1 seeds derive a root key
//! and then the first account key from it; ed25519 seeds (`sEd...`) hash the entropy
//! straight into the signing key. Payments are serialized in canonical binary field
//! order and signed here, so the seed never leaves the process.

use super::ledger::{PreparedPayment, SignedPayment};
use crate::error::{SwapError, SwapResult};

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::elliptic_curve::ff::PrimeField;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{FieldBytes, ProjectivePoint, Scalar};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use zeroize::Zeroizing;

const SECP256K1_SEED_PREFIX: u8 = 0x21;
const ED25519_SEED_PREFIX: [u8; 3] = [0x01, 0xE1, 0x4B];
const ACCOUNT_ID_PREFIX: u8 = 0x00;
const ED25519_KEY_PREFIX: u8 = 0xED;

const SIGNING_PREFIX: [u8; 4] = *b"STX\0";
const TX_ID_PREFIX: [u8; 4] = *b"TXN\0";

const PAYMENT_TYPE: u16 = 0;
const NATIVE_POSITIVE: u64 = 0x4000_0000_0000_0000;
/// 100 billion XRP in drops
const MAX_DROPS: u64 = 100_000_000_000_000_000;

fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_check(payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    data.extend_from_slice(&checksum(payload));
    bs58::encode(data)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

/// Payload of a checksummed base58 string, `None` if malformed
fn decode_check(value: &str) -> Option<Vec<u8>> {
    let data = bs58::decode(value)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_vec()
        .ok()?;
    if data.len() < 5 {
        return None;
    }
    let (payload, check) = data.split_at(data.len() - 4);
    (checksum(payload)[..] == *check).then(|| payload.to_vec())
}

fn account_id(public_key: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(Sha256::digest(public_key));
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest);
    id
}

/// Classic address for a 20-byte account id
pub fn encode_address(account_id: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ACCOUNT_ID_PREFIX);
    payload.extend_from_slice(account_id);
    encode_check(&payload)
}

/// Account id of a classic `r...` address
pub fn decode_address(address: &str) -> SwapResult<[u8; 20]> {
    let payload = decode_check(address)
        .filter(|p| p.len() == 21 && p[0] == ACCOUNT_ID_PREFIX)
        .ok_or_else(|| {
            SwapError::InvalidRequest(format!("{} is not a classic ledger address", address))
        })?;
    let mut id = [0u8; 20];
    id.copy_from_slice(&payload[1..]);
    Ok(id)
}

/// First scalar in `[1, n)` from SHA-512-half of `bytes || [discriminator] || counter`
fn derive_scalar(bytes: &[u8], discriminator: Option<u32>) -> SwapResult<Scalar> {
    for counter in 0..=u32::MAX {
        let mut hasher = Sha512::new();
        hasher.update(bytes);
        if let Some(d) = discriminator {
            hasher.update(d.to_be_bytes());
        }
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();

        let candidate: Option<Scalar> =
            Scalar::from_repr(FieldBytes::clone_from_slice(&digest[..32])).into();
        if let Some(scalar) = candidate.filter(|s| !bool::from(s.is_zero())) {
            return Ok(scalar);
        }
    }
    Err(SwapError::ConfigurationMissing(
        "ledger seed yields no valid key".to_string(),
    ))
}

fn secp256k1_key(entropy: &[u8]) -> SwapResult<k256::ecdsa::SigningKey> {
    let root = derive_scalar(entropy, None)?;
    let root_public = (ProjectivePoint::GENERATOR * root)
        .to_affine()
        .to_encoded_point(true);
    // Account 0 of the root key family
    let tweak = derive_scalar(root_public.as_bytes(), Some(0))?;
    k256::ecdsa::SigningKey::from_bytes(&(root + tweak).to_bytes())
        .map_err(|e| SwapError::ConfigurationMissing(format!("ledger key derivation failed: {}", e)))
}

enum LedgerKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// Signing key and classic address derived from a family seed
pub struct LedgerWallet {
    key: LedgerKey,
    public_key: Vec<u8>,
    account_id: [u8; 20],
    address: String,
}

impl fmt::Debug for LedgerWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerWallet")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl LedgerWallet {
    /// Derive the wallet for a secp256k1 (`s...`) or ed25519 (`sEd...`) family seed
    pub fn from_seed(seed: &str) -> SwapResult<Self> {
        let payload = Zeroizing::new(decode_check(seed.trim()).ok_or_else(|| {
            SwapError::ConfigurationMissing("ledger seed is not a valid family seed".to_string())
        })?);

        let (key, public_key) = if payload.len() == 19 && payload[..3] == ED25519_SEED_PREFIX {
            let private = Zeroizing::new(sha512_half(&[&payload[3..]]));
            let key = ed25519_dalek::SigningKey::from_bytes(&private);
            let mut public_key = vec![ED25519_KEY_PREFIX];
            public_key.extend_from_slice(key.verifying_key().as_bytes());
            (LedgerKey::Ed25519(key), public_key)
        } else if payload.len() == 17 && payload[0] == SECP256K1_SEED_PREFIX {
            let key = secp256k1_key(&payload[1..])?;
            let public_key = key.verifying_key().to_encoded_point(true).as_bytes().to_vec();
            (LedgerKey::Secp256k1(key), public_key)
        } else {
            return Err(SwapError::ConfigurationMissing(
                "ledger seed has an unknown key type".to_string(),
            ));
        };

        let account_id = account_id(&public_key);
        Ok(Self {
            key,
            public_key,
            account_id,
            address: encode_address(&account_id),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Serialize, sign and hash a prepared payment from this wallet's account
    pub fn sign(&self, prepared: &PreparedPayment) -> SwapResult<SignedPayment> {
        let fields = self.fields(prepared)?;
        let unsigned = fields.encode(&self.public_key, None);
        let signature = self.signature(&unsigned)?;
        let blob = fields.encode(&self.public_key, Some(&signature));

        Ok(SignedPayment {
            hash: hex::encode_upper(sha512_half(&[&TX_ID_PREFIX[..], &blob[..]])),
            tx_blob: hex::encode_upper(&blob),
            last_ledger_sequence: prepared.last_ledger_sequence,
        })
    }

    fn fields(&self, prepared: &PreparedPayment) -> SwapResult<PaymentFields> {
        let payment = &prepared.payment;
        if payment.account != self.address {
            return Err(SwapError::InvalidRequest(format!(
                "payment from {} cannot be signed by {}",
                payment.account, self.address
            )));
        }
        let amount = u64::try_from(payment.amount_drops)
            .ok()
            .filter(|drops| *drops <= MAX_DROPS)
            .ok_or_else(|| {
                SwapError::InvalidAmount(format!("{} drops is out of range", payment.amount_drops))
            })?;

        Ok(PaymentFields {
            sequence: prepared.sequence,
            destination_tag: payment.destination_tag,
            last_ledger_sequence: prepared.last_ledger_sequence,
            amount,
            fee: prepared.fee_drops.min(MAX_DROPS),
            account: self.account_id,
            destination: decode_address(&payment.destination)?,
        })
    }

    fn signature(&self, unsigned: &[u8]) -> SwapResult<Vec<u8>> {
        match &self.key {
            LedgerKey::Secp256k1(key) => {
                let digest = sha512_half(&[&SIGNING_PREFIX[..], unsigned]);
                let signature: k256::ecdsa::Signature = key
                    .sign_prehash(&digest)
                    .map_err(|e| SwapError::tx_failed(format!("ledger signing failed: {}", e), None))?;
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            LedgerKey::Ed25519(key) => {
                use ed25519_dalek::Signer;

                let mut message = SIGNING_PREFIX.to_vec();
                message.extend_from_slice(unsigned);
                Ok(key.sign(&message).to_bytes().to_vec())
            }
        }
    }
}

/// Payment fields in canonical (type code, field code) order
struct PaymentFields {
    sequence: u32,
    destination_tag: Option<u32>,
    last_ledger_sequence: u32,
    amount: u64,
    fee: u64,
    account: [u8; 20],
    destination: [u8; 20],
}

impl PaymentFields {
    fn encode(&self, public_key: &[u8], signature: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);

        // TransactionType (UInt16 2)
        out.push(0x12);
        out.extend_from_slice(&PAYMENT_TYPE.to_be_bytes());
        // Flags (UInt32 2), Sequence (UInt32 4)
        out.push(0x22);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.push(0x24);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        // DestinationTag (UInt32 14)
        if let Some(tag) = self.destination_tag {
            out.push(0x2E);
            out.extend_from_slice(&tag.to_be_bytes());
        }
        // LastLedgerSequence (UInt32 27)
        out.extend_from_slice(&[0x20, 0x1B]);
        out.extend_from_slice(&self.last_ledger_sequence.to_be_bytes());
        // Amount (Amount 1), Fee (Amount 8)
        out.push(0x61);
        out.extend_from_slice(&(NATIVE_POSITIVE | self.amount).to_be_bytes());
        out.push(0x68);
        out.extend_from_slice(&(NATIVE_POSITIVE | self.fee).to_be_bytes());
        // SigningPubKey (Blob 3), TxnSignature (Blob 4)
        out.push(0x73);
        push_vl(&mut out, public_key);
        if let Some(signature) = signature {
            out.push(0x74);
            push_vl(&mut out, signature);
        }
        // Account (AccountID 1), Destination (AccountID 3)
        out.push(0x81);
        push_vl(&mut out, &self.account);
        out.push(0x83);
        push_vl(&mut out, &self.destination);
        out
    }
}

/// Length-prefixed blob; keys, signatures and account ids all fit the one-byte form
fn push_vl(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= 192);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ledger::Payment;
    use crate::error::ErrorKind;

    const GENESIS_SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTb";
    const GENESIS_ACCOUNT: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    fn ed25519_seed() -> String {
        let mut payload = ED25519_SEED_PREFIX.to_vec();
        payload.extend_from_slice(&[7u8; 16]);
        encode_check(&payload)
    }

    fn prepared(wallet: &LedgerWallet, destination_tag: Option<u32>) -> PreparedPayment {
        PreparedPayment {
            payment: Payment {
                account: wallet.address().to_string(),
                destination: encode_address(&[9u8; 20]),
                amount_drops: 2_000_000,
                destination_tag,
            },
            sequence: 7,
            fee_drops: 12,
            last_ledger_sequence: 120,
        }
    }

    /// Split a signed blob around its TxnSignature field
    fn signature_in<'a>(blob: &'a [u8], unsigned: &[u8]) -> &'a [u8] {
        // Account and Destination close the blob, 22 bytes each
        let split = unsigned.len() - 44;
        assert_eq!(&blob[..split], &unsigned[..split]);
        assert_eq!(blob[split], 0x74);
        let len = blob[split + 1] as usize;
        assert_eq!(&blob[split + 2 + len..], &unsigned[split..]);
        &blob[split + 2..split + 2 + len]
    }

    #[test]
    fn test_secp256k1_seed_derives_known_account() {
        let wallet = LedgerWallet::from_seed(GENESIS_SEED).unwrap();
        assert_eq!(wallet.address(), GENESIS_ACCOUNT);
        assert_eq!(wallet.public_key().len(), 33);
        assert!(!format!("{:?}", wallet).contains(GENESIS_SEED));
    }

    #[test]
    fn test_ed25519_seed() {
        let wallet = LedgerWallet::from_seed(&ed25519_seed()).unwrap();
        assert!(wallet.address().starts_with('r'));
        assert_eq!(wallet.public_key()[0], ED25519_KEY_PREFIX);
        assert_eq!(wallet.public_key().len(), 33);
        assert_eq!(decode_address(wallet.address()).unwrap(), account_id(wallet.public_key()));
    }

    #[test]
    fn test_bad_seed_is_configuration_error() {
        let mut corrupted = GENESIS_SEED.to_string();
        corrupted.pop();
        corrupted.push('c');
        for seed in [corrupted.as_str(), "not-a-seed", GENESIS_ACCOUNT] {
            let err = LedgerWallet::from_seed(seed).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigurationMissing);
        }
    }

    #[test]
    fn test_address_round_trip_and_rejects_garbage() {
        let id = [0xABu8; 20];
        assert_eq!(decode_address(&encode_address(&id)).unwrap(), id);
        assert!(decode_address("rDeposit").is_err());
        assert!(decode_address(GENESIS_SEED).is_err());
    }

    #[test]
    fn test_payment_layout() {
        let wallet = LedgerWallet::from_seed(GENESIS_SEED).unwrap();
        let fields = wallet.fields(&prepared(&wallet, Some(42))).unwrap();
        let unsigned = fields.encode(wallet.public_key(), None);

        assert_eq!(&unsigned[..3], &[0x12, 0x00, 0x00]);
        assert_eq!(&unsigned[3..8], &[0x22, 0, 0, 0, 0]);
        assert_eq!(&unsigned[8..13], &[0x24, 0, 0, 0, 7]);
        assert_eq!(&unsigned[13..18], &[0x2E, 0, 0, 0, 42]);
        assert_eq!(&unsigned[18..24], &[0x20, 0x1B, 0, 0, 0, 120]);
        // 2 XRP and a 12 drop fee
        assert_eq!(&unsigned[24..33], &[0x61, 0x40, 0, 0, 0, 0, 0x1E, 0x84, 0x80]);
        assert_eq!(&unsigned[33..42], &[0x68, 0x40, 0, 0, 0, 0, 0, 0, 0x0C]);
        assert_eq!(&unsigned[42..44], &[0x73, 33]);
        assert_eq!(unsigned.len(), 44 + 33 + 44);
        assert_eq!(&unsigned[unsigned.len() - 22..unsigned.len() - 20], &[0x83, 0x14]);
        assert_eq!(&unsigned[unsigned.len() - 20..], &[9u8; 20]);
    }

    #[test]
    fn test_secp256k1_signature_verifies() {
        use k256::ecdsa::signature::hazmat::PrehashVerifier;

        let wallet = LedgerWallet::from_seed(GENESIS_SEED).unwrap();
        let prepared = prepared(&wallet, None);
        let signed = wallet.sign(&prepared).unwrap();
        let blob = hex::decode(&signed.tx_blob).unwrap();
        assert_eq!(signed.hash, hex::encode_upper(sha512_half(&[&TX_ID_PREFIX[..], &blob[..]])));
        assert_eq!(signed.last_ledger_sequence, 120);

        let unsigned = wallet.fields(&prepared).unwrap().encode(wallet.public_key(), None);
        let signature = k256::ecdsa::Signature::from_der(signature_in(&blob, &unsigned)).unwrap();
        assert!(signature.normalize_s().is_none());

        let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(wallet.public_key()).unwrap();
        key.verify_prehash(&sha512_half(&[&SIGNING_PREFIX[..], &unsigned[..]]), &signature)
            .unwrap();
    }

    #[test]
    fn test_ed25519_signature_verifies() {
        use ed25519_dalek::Verifier;

        let wallet = LedgerWallet::from_seed(&ed25519_seed()).unwrap();
        let prepared = prepared(&wallet, Some(1));
        let blob = hex::decode(wallet.sign(&prepared).unwrap().tx_blob).unwrap();

        let unsigned = wallet.fields(&prepared).unwrap().encode(wallet.public_key(), None);
        let signature = ed25519_dalek::Signature::from_slice(signature_in(&blob, &unsigned)).unwrap();
        let mut public = [0u8; 32];
        public.copy_from_slice(&wallet.public_key()[1..]);
        let key = ed25519_dalek::VerifyingKey::from_bytes(&public).unwrap();

        let mut message = SIGNING_PREFIX.to_vec();
        message.extend_from_slice(&unsigned);
        key.verify(&message, &signature).unwrap();
    }

    #[test]
    fn test_foreign_account_and_oversized_amount_rejected() {
        let wallet = LedgerWallet::from_seed(GENESIS_SEED).unwrap();

        let mut foreign = prepared(&wallet, None);
        foreign.payment.account = encode_address(&[1u8; 20]);
        assert_eq!(wallet.sign(&foreign).unwrap_err().kind(), ErrorKind::InvalidRequest);

        let mut oversized = prepared(&wallet, None);
        oversized.payment.amount_drops = u128::from(MAX_DROPS) + 1;
        assert_eq!(wallet.sign(&oversized).unwrap_err().kind(), ErrorKind::InvalidAmount);
    }
}
