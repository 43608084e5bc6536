//! Merkle trees used for (a) the participants-root in `group_id` derivation
//! and proof-of-attestation-participation (keccak256, for on-chain
//! compatibility with the Coordinator per §3), and (b) nonce-commitment
//! trees generated during pre-processing (SHA-256, per §4.2).

use crate::crypto::h5_com;
use sha3::{Digest, Keccak256};

/// A proof is the sibling hash at each level, root-ward, plus whether the
/// leaf was the left (`false`) or right (`true`) child at that level.
pub type MerkleProof = Vec<([u8; 32], bool)>;

fn combine_sha256(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    h5_com(&[left, right])
}

fn combine_keccak(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    Keccak256::digest([left.as_slice(), right.as_slice()].concat()).into()
}

/// Builds a binary Merkle tree over `leaves` (padded by duplicating the
/// last leaf to the next power of two, matching the Coordinator's
/// chunking convention) and returns `(root, all_levels)`, combining pairs
/// with `combine`.
fn build_tree_with(leaves: &[[u8; 32]], combine: fn(&[u8; 32], &[u8; 32]) -> [u8; 32]) -> ([u8; 32], Vec<Vec<[u8; 32]>>) {
    assert!(!leaves.is_empty(), "cannot build a Merkle tree over zero leaves");

    let mut level = leaves.to_vec();
    while !level.len().is_power_of_two() {
        let last = *level.last().unwrap();
        level.push(last);
    }

    let mut levels = vec![level.clone()];
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(combine(&pair[0], &pair[1]));
        }
        levels.push(next.clone());
        level = next;
    }

    (level[0], levels)
}

/// Nonce-commitment tree (§4.2): SHA-256 internal nodes.
pub fn build_tree(leaves: &[[u8; 32]]) -> ([u8; 32], Vec<Vec<[u8; 32]>>) {
    build_tree_with(leaves, combine_sha256)
}

/// Participants-root tree (§3): keccak256 internal nodes, for on-chain
/// compatibility with the Coordinator.
pub fn build_tree_keccak(leaves: &[[u8; 32]]) -> ([u8; 32], Vec<Vec<[u8; 32]>>) {
    build_tree_with(leaves, combine_keccak)
}

pub fn proof_for_index(levels: &[Vec<[u8; 32]>], mut index: usize) -> MerkleProof {
    let mut proof = Vec::new();
    for level in levels.iter().take(levels.len() - 1) {
        let is_right = index % 2 == 1;
        let sibling_index = if is_right { index - 1 } else { index + 1 };
        proof.push((level[sibling_index], is_right));
        index /= 2;
    }
    proof
}

fn verify_proof_with(
    root: &[u8; 32],
    leaf: [u8; 32],
    proof: &MerkleProof,
    combine: fn(&[u8; 32], &[u8; 32]) -> [u8; 32],
) -> bool {
    let mut current = leaf;
    for (sibling, was_right) in proof {
        current = if *was_right { combine(sibling, &current) } else { combine(&current, sibling) };
    }
    &current == root
}

/// Verifies a nonce-commitment tree proof (SHA-256 internal nodes).
pub fn verify_proof(root: &[u8; 32], leaf: [u8; 32], proof: &MerkleProof) -> bool {
    verify_proof_with(root, leaf, proof, combine_sha256)
}

/// Verifies a participants-root / PoAP proof (keccak256 internal nodes).
pub fn verify_proof_keccak(root: &[u8; 32], leaf: [u8; 32], proof: &MerkleProof) -> bool {
    verify_proof_with(root, leaf, proof, combine_keccak)
}

/// Leaf hash for a participant, used by the participants-root and PoAP.
/// keccak256 per §3, matching the Coordinator's on-chain computation.
pub fn hash_participant(id: u64, address: &[u8; 20]) -> [u8; 32] {
    Keccak256::digest([id.to_be_bytes().as_slice(), address.as_slice()].concat()).into()
}

/// Flattens a proof to bytes for calldata: 33 bytes per step (32-byte
/// sibling, 1-byte left/right flag).
pub fn encode_proof(proof: &MerkleProof) -> Vec<u8> {
    let mut out = Vec::with_capacity(proof.len() * 33);
    for (sibling, was_right) in proof {
        out.extend_from_slice(sibling);
        out.push(*was_right as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_verifies_for_every_leaf() {
        let leaves: Vec<[u8; 32]> = (0..5u8).map(|i| [i; 32]).collect();
        let (root, levels) = build_tree(&leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = proof_for_index(&levels, i);
            assert!(verify_proof(&root, *leaf, &proof));
        }
    }

    #[test]
    fn proof_fails_for_foreign_leaf() {
        let leaves: Vec<[u8; 32]> = (0..4u8).map(|i| [i; 32]).collect();
        let (root, levels) = build_tree(&leaves);
        let proof = proof_for_index(&levels, 0);
        assert!(!verify_proof(&root, [99u8; 32], &proof));
    }

    #[test]
    fn keccak_proof_verifies_for_every_leaf() {
        let leaves: Vec<[u8; 32]> = (0..3u8).map(|i| hash_participant(i as u64, &[i; 20])).collect();
        let (root, levels) = build_tree_keccak(&leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = proof_for_index(&levels, i);
            assert!(verify_proof_keccak(&root, *leaf, &proof));
        }
    }
}
