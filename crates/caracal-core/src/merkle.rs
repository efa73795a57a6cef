//! Tamper-evident Merkle primitives, used by `ledger.rs`'s batcher.
//!
//! A binary tree over SHA-256 leaf/internal hashes with domain separation
//! (`0x00` prefixes a leaf, `0x01` prefixes an internal node) so a leaf hash
//! can never be replayed as an internal node hash or vice versa. The last
//! leaf is duplicated when a level has an odd count, the common fix for
//! second-preimage style ambiguity in naive Merkle trees.

use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

pub fn hash_leaf(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(bytes);
    hasher.finalize().into()
}

fn hash_internal(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// One step of a Merkle inclusion path: the sibling hash and which side it
/// sits on relative to the node being folded up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: Hash,
    pub sibling_is_right: bool,
}

/// Build every level of the tree, returning them bottom-up so both the root
/// and a proof for any leaf can be derived without recomputing hashes.
fn build_levels(leaves: &[Hash]) -> Vec<Vec<Hash>> {
    assert!(!leaves.is_empty(), "merkle tree requires at least one leaf");
    let mut levels = vec![leaves.to_vec()];
    while levels.last().unwrap().len() > 1 {
        let current = levels.last().unwrap();
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        let mut i = 0;
        while i < current.len() {
            let left = current[i];
            let right = if i + 1 < current.len() { current[i + 1] } else { current[i] };
            next.push(hash_internal(&left, &right));
            i += 2;
        }
        levels.push(next);
    }
    levels
}

pub fn merkle_root(leaves: &[Hash]) -> Hash {
    let levels = build_levels(leaves);
    levels.last().unwrap()[0]
}

/// Path of sibling hashes from leaf `index` up to (but not including) the
/// root, in bottom-to-top order.
pub fn merkle_proof(leaves: &[Hash], index: usize) -> Vec<ProofStep> {
    let levels = build_levels(leaves);
    let mut path = Vec::new();
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        let sibling = if sibling_idx < level.len() { level[sibling_idx] } else { level[idx] };
        path.push(ProofStep {
            sibling,
            sibling_is_right: idx % 2 == 0,
        });
        idx /= 2;
    }
    path
}

pub fn verify_proof(leaf: Hash, path: &[ProofStep], root: Hash) -> bool {
    let mut acc = leaf;
    for step in path {
        acc = if step.sibling_is_right {
            hash_internal(&acc, &step.sibling)
        } else {
            hash_internal(&step.sibling, &acc)
        };
    }
    acc == root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_root_is_the_leaf_hash_itself() {
        let leaf = hash_leaf(b"event-1");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn odd_leaf_count_duplicates_the_last_leaf() {
        let leaves: Vec<Hash> = (0..3).map(|i| hash_leaf(format!("event-{i}").as_bytes())).collect();
        let with_duplicate: Vec<Hash> = vec![leaves[0], leaves[1], leaves[2], leaves[2]];
        assert_eq!(merkle_root(&leaves), merkle_root(&with_duplicate));
    }

    #[test]
    fn every_leaf_has_a_valid_proof() {
        let leaves: Vec<Hash> = (0..7).map(|i| hash_leaf(format!("event-{i}").as_bytes())).collect();
        let root = merkle_root(&leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = merkle_proof(&leaves, i);
            assert!(verify_proof(*leaf, &proof, root), "leaf {i} failed to verify");
        }
    }

    #[test]
    fn tampering_with_a_leaf_invalidates_its_proof() {
        let leaves: Vec<Hash> = (0..4).map(|i| hash_leaf(format!("event-{i}").as_bytes())).collect();
        let root = merkle_root(&leaves);
        let proof = merkle_proof(&leaves, 1);
        let tampered_leaf = hash_leaf(b"event-1-tampered");
        assert!(!verify_proof(tampered_leaf, &proof, root));
    }

    #[test]
    fn leaf_and_internal_hashes_never_collide_by_construction() {
        let leaf = hash_leaf(b"x");
        let internal = hash_internal(&leaf, &leaf);
        assert_ne!(leaf, internal);
    }
}
