//! Merkle commitment over escrow secret hashes
//!
//! The tree is a complete binary tree stored in an array: leaves occupy the tail in
//! reverse order and every inner node at `i` hashes its children at `2i + 1` and
//! `2i + 2`. Pairs are hashed commutatively (sorted) so proofs do not carry
//! left/right flags.

use sha3::{Digest, Keccak256};

pub type Hash32 = [u8; 32];

pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Commutative pair hash
pub fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo);
    buf[32..].copy_from_slice(hi);
    keccak256(&buf)
}

/// Leaf for the secret at `index`: keccak256(uint64 index || secret hash)
pub fn secret_leaf(index: u64, secret_hash: &Hash32) -> Hash32 {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&index.to_be_bytes());
    buf[8..].copy_from_slice(secret_hash);
    keccak256(&buf)
}

/// Leaves for a list of secret hashes, in array order
pub fn secret_leaves(secret_hashes: &[Hash32]) -> Vec<Hash32> {
    secret_hashes
        .iter()
        .enumerate()
        .map(|(i, h)| secret_leaf(i as u64, h))
        .collect()
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<Hash32>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build a tree; `None` for an empty leaf set
    pub fn from_leaves(leaves: &[Hash32]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let size = 2 * leaves.len() - 1;
        let mut nodes = vec![[0u8; 32]; size];
        for (i, leaf) in leaves.iter().enumerate() {
            nodes[size - 1 - i] = *leaf;
        }
        for i in (0..size - leaves.len()).rev() {
            nodes[i] = hash_pair(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }

        Some(Self {
            nodes,
            leaf_count: leaves.len(),
        })
    }

    pub fn root(&self) -> Hash32 {
        self.nodes[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn leaf(&self, index: usize) -> Option<Hash32> {
        (index < self.leaf_count).then(|| self.nodes[self.nodes.len() - 1 - index])
    }

    /// Sibling path from the leaf at `index` up to the root
    pub fn proof(&self, index: usize) -> Option<Vec<Hash32>> {
        if index >= self.leaf_count {
            return None;
        }

        let mut pos = self.nodes.len() - 1 - index;
        let mut proof = Vec::new();
        while pos > 0 {
            let sibling = if pos % 2 == 1 { pos + 1 } else { pos - 1 };
            proof.push(self.nodes[sibling]);
            pos = (pos - 1) / 2;
        }
        Some(proof)
    }
}

/// Check a proof produced by `MerkleTree::proof`
pub fn verify(root: &Hash32, leaf: &Hash32, proof: &[Hash32]) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, node| hash_pair(&acc, node));
    &computed == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Hash32> {
        (0..n).map(|i| keccak256(&[i])).collect()
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let l = leaves(1);
        let tree = MerkleTree::from_leaves(&l).unwrap();
        assert_eq!(tree.root(), l[0]);
        assert_eq!(tree.proof(0).unwrap(), Vec::<Hash32>::new());
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let tree = MerkleTree::from_leaves(&l).unwrap();
        assert_eq!(tree.root(), hash_pair(&l[0], &l[1]));
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        for n in [2u8, 3, 4, 5, 7, 8] {
            let l = leaves(n);
            let tree = MerkleTree::from_leaves(&l).unwrap();
            for (i, leaf) in l.iter().enumerate() {
                assert_eq!(tree.leaf(i), Some(*leaf));
                let proof = tree.proof(i).unwrap();
                assert!(verify(&tree.root(), leaf, &proof), "n={} i={}", n, i);
            }
            assert!(tree.proof(n as usize).is_none());
        }
    }

    #[test]
    fn test_leaf_order_changes_root() {
        let hashes = leaves(4);
        let mut swapped = hashes.clone();
        swapped.swap(0, 2);
        let a = MerkleTree::from_leaves(&secret_leaves(&hashes)).unwrap();
        let b = MerkleTree::from_leaves(&secret_leaves(&swapped)).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_empty_tree() {
        assert!(MerkleTree::from_leaves(&[]).is_none());
    }
}
