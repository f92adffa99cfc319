//! Hash-lock secrets for escrow orders
//!
//! A `SecretSet` belongs to exactly one order. Secrets are never logged (their
//! `Debug` output is redacted) and are zeroized when the set is dropped or discarded.
//! Releasing a secret is irreversible: it lets the counterpart unlock the escrow, so
//! `SecretVault::release` only hands out secrets for fills the backend reported ready.

pub mod merkle;

use crate::error::{SwapError, SwapResult};
use merkle::{keccak256, secret_leaves, Hash32, MerkleTree};

use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One 32-byte escrow secret
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }

    /// 0x-prefixed hex, the form backends expect on submission
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn hash(&self) -> Hash32 {
        keccak256(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashLockMode {
    Single,
    Merkle,
}

/// Secrets of one order together with their hash-lock commitment
pub struct SecretSet {
    secrets: Vec<Secret>,
    mode: HashLockMode,
    secret_hashes: Vec<Hash32>,
    hash_lock: Hash32,
}

impl SecretSet {
    /// Build the commitment for an ordered list of secrets
    pub fn from_secrets(secrets: Vec<Secret>) -> SwapResult<Self> {
        let secret_hashes: Vec<Hash32> = secrets.iter().map(Secret::hash).collect();

        let (mode, hash_lock) = match secrets.len() {
            0 => {
                return Err(SwapError::InvalidRequest(
                    "an escrow order needs at least one secret".to_string(),
                ))
            }
            1 => (HashLockMode::Single, secret_hashes[0]),
            n => {
                let tree = MerkleTree::from_leaves(&secret_leaves(&secret_hashes))
                    .ok_or_else(|| SwapError::InvalidRequest("empty merkle tree".to_string()))?;
                // Top 16 bits of a multi-fill lock carry the number of parts minus one
                let mut lock = tree.root();
                let parts = ((n - 1) as u16).to_be_bytes();
                lock[0] = parts[0];
                lock[1] = parts[1];
                (HashLockMode::Merkle, lock)
            }
        };

        Ok(Self {
            secrets,
            mode,
            secret_hashes,
            hash_lock,
        })
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn mode(&self) -> HashLockMode {
        self.mode
    }

    pub fn hash_lock(&self) -> Hash32 {
        self.hash_lock
    }

    pub fn hash_lock_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash_lock))
    }

    pub fn secret_hashes(&self) -> &[Hash32] {
        &self.secret_hashes
    }

    pub fn secret_hashes_hex(&self) -> Vec<String> {
        self.secret_hashes
            .iter()
            .map(|h| format!("0x{}", hex::encode(h)))
            .collect()
    }

    /// Merkle tree over the secret leaves; `None` for single-secret sets
    pub fn merkle_tree(&self) -> Option<MerkleTree> {
        match self.mode {
            HashLockMode::Single => None,
            HashLockMode::Merkle => MerkleTree::from_leaves(&secret_leaves(&self.secret_hashes)),
        }
    }

    /// Secrets for the given fill indices, in the order requested
    pub fn release(&self, fill_indices: &[usize]) -> SwapResult<Vec<Secret>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(fill_indices.len());
        for &idx in fill_indices {
            let secret = self.secrets.get(idx).ok_or_else(|| {
                SwapError::InvalidRequest(format!(
                    "fill index {} out of range for {} secrets",
                    idx,
                    self.secrets.len()
                ))
            })?;
            if seen.insert(idx) {
                out.push(secret.clone());
            }
        }
        Ok(out)
    }

    /// Zero every secret and drop them
    pub fn discard(&mut self) {
        self.secrets.zeroize();
    }
}

impl fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSet")
            .field("count", &self.secrets.len())
            .field("mode", &self.mode)
            .field("hash_lock", &self.hash_lock_hex())
            .finish()
    }
}

/// Holds the secrets of one order for its lifetime and tracks what was released
#[derive(Debug)]
pub struct SecretVault {
    set: SecretSet,
    released: BTreeSet<usize>,
    discarded: bool,
}

impl SecretVault {
    /// Generate `count` random secrets and their commitment
    pub fn generate(count: usize) -> SwapResult<SecretSet> {
        let mut secrets: Vec<Secret> = Vec::with_capacity(count);
        while secrets.len() < count {
            let candidate = Secret::random();
            if !secrets.contains(&candidate) {
                secrets.push(candidate);
            }
        }
        let set = SecretSet::from_secrets(secrets)?;
        debug!("Generated {} secrets ({:?} hash lock)", set.len(), set.mode());
        Ok(set)
    }

    /// Take ownership of an order's secrets
    pub fn hold(set: SecretSet) -> Self {
        Self {
            set,
            released: BTreeSet::new(),
            discarded: false,
        }
    }

    pub fn secrets(&self) -> &SecretSet {
        &self.set
    }

    pub fn released(&self) -> &BTreeSet<usize> {
        &self.released
    }

    /// Secrets for ready fills that have not been released yet
    pub fn release(&mut self, ready_fills: &[usize]) -> SwapResult<Vec<(usize, Secret)>> {
        if self.discarded {
            return Err(SwapError::InvalidRequest(
                "secrets were discarded after the order terminated".to_string(),
            ));
        }

        let fresh: Vec<usize> = ready_fills
            .iter()
            .copied()
            .filter(|idx| !self.released.contains(idx))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let secrets = self.set.release(&fresh)?;
        self.released.extend(fresh.iter().copied());

        if !fresh.is_empty() {
            info!("Releasing secrets for fills {:?}", fresh);
        }
        Ok(fresh.into_iter().zip(secrets).collect())
    }

    /// Zero the secrets once the order is terminal
    pub fn discard(&mut self) {
        if !self.discarded {
            self.set.discard();
            self.discarded = true;
            debug!("Order secrets discarded");
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Nothing left to release
    pub fn is_exhausted(&self) -> bool {
        self.discarded || self.released.len() >= self.set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::merkle::{secret_leaf, verify};
    use super::*;

    #[test]
    fn test_single_secret_uses_direct_hash_lock() {
        let set = SecretVault::generate(1).unwrap();
        assert_eq!(set.mode(), HashLockMode::Single);
        assert_eq!(set.hash_lock(), keccak256(set.release(&[0]).unwrap()[0].expose()));
        assert!(set.merkle_tree().is_none());
    }

    #[test]
    fn test_zero_secrets_rejected() {
        assert!(SecretVault::generate(0).is_err());
    }

    #[test]
    fn test_four_secret_preset() {
        let set = SecretVault::generate(4).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.mode(), HashLockMode::Merkle);

        let all = set.release(&[0, 1, 2, 3]).unwrap();
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_ne!(all[i], all[j]);
            }
        }

        // Leaves follow generation order
        let tree = set.merkle_tree().unwrap();
        for (i, secret) in all.iter().enumerate() {
            let leaf = secret_leaf(i as u64, &secret.hash());
            assert_eq!(tree.leaf(i), Some(leaf));
            assert!(verify(&tree.root(), &leaf, &tree.proof(i).unwrap()));
        }

        // Lock carries parts count in the top 16 bits and the root below
        let lock = set.hash_lock();
        assert_eq!(u16::from_be_bytes([lock[0], lock[1]]), 3);
        assert_eq!(&lock[2..], &tree.root()[2..]);

        let released = set.release(&[0, 2]).unwrap();
        assert_eq!(released, vec![all[0].clone(), all[2].clone()]);
    }

    #[test]
    fn test_release_out_of_range_is_error() {
        let set = SecretVault::generate(2).unwrap();
        assert!(set.release(&[2]).is_err());
    }

    #[test]
    fn test_vault_releases_each_ready_fill_once() {
        let set = SecretVault::generate(3).unwrap();
        let expected = set.release(&[0, 1, 2]).unwrap();
        let mut vault = SecretVault::hold(set);

        let first = vault.release(&[1]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, 1);
        assert_eq!(first[0].1, expected[1]);

        let second = vault.release(&[1, 2, 2]).unwrap();
        assert_eq!(second.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![2]);

        // released is a subset of what was reported ready
        assert!(vault.released().iter().all(|i| [1usize, 2].contains(i)));
        assert!(!vault.released().contains(&0));

        assert!(!vault.is_exhausted());
        vault.release(&[0]).unwrap();
        assert!(vault.is_exhausted());
    }

    #[test]
    fn test_discarded_vault_releases_nothing() {
        let mut vault = SecretVault::hold(SecretVault::generate(2).unwrap());
        vault.discard();
        assert!(vault.is_discarded());
        assert!(vault.release(&[0]).is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let set = SecretVault::generate(1).unwrap();
        let secret = set.release(&[0]).unwrap().remove(0);
        let hex_secret = secret.to_hex();
        assert!(!format!("{:?}", secret).contains(&hex_secret[2..]));
        assert!(!format!("{:?}", set).contains(&hex_secret[2..]));
    }
}
