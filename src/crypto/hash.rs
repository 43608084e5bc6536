//! Hash-to-field family with domain separation (§4.1).

use super::scalar::Scalar;
use crate::constants::HASH_DOMAIN;
use sha2::{Digest, Sha256};

fn tagged_hasher(discriminant: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN.as_bytes());
    hasher.update(discriminant.as_bytes());
    hasher
}

/// Produces a scalar in `[0, N)` from the concatenation of `parts` under
/// the given domain discriminant (`"dkg" | "rho" | "chal" | "nonce"`).
pub fn hash_to_scalar(discriminant: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = tagged_hasher(discriminant);
    for part in parts {
        hasher.update(part);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    Scalar::from_bytes_mod_order(&digest)
}

/// `H4("msg")`: a plain 32-byte hash, no domain separation beyond the tag
/// baked into the label itself.
pub fn h4_msg(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"H4");
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `H5("com")`: the Merkle-tree leaf/node hasher used for nonce commitment
/// trees and participant attestation proofs.
pub fn h5_com(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"H5");
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_to_scalar_is_deterministic() {
        let a = hash_to_scalar(crate::constants::RHO_TAG, &[b"hello"]);
        let b = hash_to_scalar(crate::constants::RHO_TAG, &[b"hello"]);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_discriminants_diverge() {
        let a = hash_to_scalar(crate::constants::RHO_TAG, &[b"same"]);
        let b = hash_to_scalar(crate::constants::CHAL_TAG, &[b"same"]);
        assert_ne!(a, b);
    }
}
