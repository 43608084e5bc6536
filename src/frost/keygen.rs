//! FROST distributed key generation: polynomial commitments, proof of
//! knowledge, verifiable secret sharing (§4.2).

use crate::constants::DKG_TAG;
use crate::crypto::{h5_com, hash_to_scalar, Point, Scalar};
use crate::model::{GroupId, Participant, ParticipantId};
use rand::RngCore;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct ProofOfKnowledge {
    pub r: Point,
    pub mu: Scalar,
}

/// Draws `t` random coefficients and the corresponding commitment vector
/// `C_i = g·a_i`, plus a proof of knowledge of `a_0`.
pub fn generate_coefficients_and_pok(
    this_id: ParticipantId,
    threshold: u64,
    rng: &mut impl RngCore,
) -> (Vec<Scalar>, Vec<Point>, ProofOfKnowledge) {
    let coefficients: Vec<Scalar> = (0..threshold).map(|_| Scalar::random(rng)).collect();
    let commitments: Vec<Point> = coefficients.iter().map(Point::from_scalar).collect();

    let k = Scalar::random(rng);
    let r = Point::from_scalar(&k);
    let c = keygen_challenge(this_id, commitments[0], r);
    let mu = k + coefficients[0] * c;

    (coefficients, commitments, ProofOfKnowledge { r, mu })
}

fn keygen_challenge(id: ParticipantId, c0: Point, r: Point) -> Scalar {
    hash_to_scalar(DKG_TAG, &[&id.to_be_bytes(), &c0.to_bytes(), &r.to_bytes()])
}

/// Verifies `g·μ == R + C_0·c`.
pub fn verify_pok(id: ParticipantId, c0: Point, pok: &ProofOfKnowledge) -> bool {
    let c = keygen_challenge(id, c0, pok.r);
    Point::from_scalar(&pok.mu).equals(&(pok.r + c0.multiply(&c)))
}

/// Evaluates a participant's commitment polynomial at `x` (without
/// knowledge of the coefficients): `Σ_k C_k · x^k`.
pub fn eval_commitment(commitments: &[Point], x: ParticipantId) -> Point {
    let x_scalar = Scalar::from(x);
    let mut power = Scalar::one();
    let mut acc = Point::identity();
    for c in commitments {
        acc = acc + c.multiply(&power);
        power = power * x_scalar;
    }
    acc
}

/// Evaluates the private polynomial at `x`: `Σ_k a_k · x^k`.
pub fn eval_polynomial(coefficients: &[Scalar], x: ParticipantId) -> Scalar {
    let x_scalar = Scalar::from(x);
    let mut power = Scalar::one();
    let mut acc = Scalar::zero();
    for a in coefficients {
        acc = acc + *a * power;
        power = power * x_scalar;
    }
    acc
}

/// Computes the ECDH-derived mask for the VSS share sent from `sender`
/// (with commitment `sender_c0`) to `target` (with own commitment
/// public `target_c0`): the x-coordinate of `a_0 · C_{target,0}` (§4.2).
fn share_mask(sender_a0: &Scalar, target_c0: Point) -> [u8; 32] {
    target_c0.multiply(sender_a0).x_coordinate_bytes()
}

fn xor32(a: [u8; 32], b: [u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Encrypts the share `evalPoly(a, target)` for `target` using the
/// ECDH mask derived against `target_c0`.
pub fn encrypt_share(
    coefficients: &[Scalar],
    target: ParticipantId,
    target_c0: Point,
) -> [u8; 32] {
    let share = eval_polynomial(coefficients, target);
    let mask = share_mask(&coefficients[0], target_c0);
    xor32(share.to_bytes(), mask)
}

/// Decrypts a share received from `sender` (whose first coefficient
/// commitment is `sender_c0`), using this participant's own `a_0`.
pub fn decrypt_share(encrypted: [u8; 32], own_a0: &Scalar, sender_c0: Point) -> Option<Scalar> {
    let mask = share_mask(own_a0, sender_c0);
    Scalar::from_bytes(&xor32(encrypted, mask))
}

/// `verification_share_i = Σ_k evalCommitment(commitments_k, i)`.
pub fn compute_verification_share(
    commitments_by_id: &BTreeMap<ParticipantId, Vec<Point>>,
    this_id: ParticipantId,
) -> Point {
    commitments_by_id
        .values()
        .map(|c| eval_commitment(c, this_id))
        .sum()
}

/// `signing_share_i = Σ_k received_share_{k→i}`.
pub fn compute_signing_share(shares: &BTreeMap<ParticipantId, Scalar>) -> Scalar {
    shares.values().copied().sum()
}

/// Group public key = `Σ_k C_{k,0}`.
pub fn derive_group_public_key(commitments_by_id: &BTreeMap<ParticipantId, Vec<Point>>) -> Point {
    commitments_by_id.values().map(|c| c[0]).sum()
}

/// `group_id = keccak256(participants_root || n || t || context)`, matching
/// the Coordinator's on-chain computation (§3): keccak256 throughout, both
/// for the participants-root tree and for the final group id hash.
pub fn calc_group_id(participants: &[Participant], threshold: u64, context: &[u8; 32]) -> GroupId {
    use sha3::{Digest, Keccak256};

    let mut sorted = participants.to_vec();
    sorted.sort_by_key(|p| p.id);
    let leaves: Vec<[u8; 32]> = sorted
        .iter()
        .map(|p| super::merkle::hash_participant(p.id, &p.address))
        .collect();
    let (root, _) = super::merkle::build_tree_keccak(&leaves);

    Keccak256::digest(
        [root.as_slice(), &(participants.len() as u64).to_be_bytes(), &threshold.to_be_bytes(), context.as_slice()]
            .concat(),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pok_round_trip() {
        let mut rng = rand::thread_rng();
        let (_coeffs, commitments, pok) = generate_coefficients_and_pok(1, 2, &mut rng);
        assert!(verify_pok(1, commitments[0], &pok));
    }

    #[test]
    fn tampered_pok_fails() {
        let mut rng = rand::thread_rng();
        let (_coeffs, commitments, mut pok) = generate_coefficients_and_pok(1, 2, &mut rng);
        pok.mu = pok.mu + Scalar::one();
        assert!(!verify_pok(1, commitments[0], &pok));
    }

    #[test]
    fn share_consistent_with_commitment() {
        let mut rng = rand::thread_rng();
        let (coeffs, commitments, _pok) = generate_coefficients_and_pok(1, 2, &mut rng);
        let share = eval_polynomial(&coeffs, 3);
        let expected = eval_commitment(&commitments, 3);
        assert!(Point::from_scalar(&share).equals(&expected));
    }

    #[test]
    fn encrypted_share_round_trips() {
        let mut rng = rand::thread_rng();
        let (sender_coeffs, _sender_c, _pok1) = generate_coefficients_and_pok(1, 2, &mut rng);
        let (target_coeffs, target_c, _pok2) = generate_coefficients_and_pok(2, 2, &mut rng);

        let encrypted = encrypt_share(&sender_coeffs, 2, target_c[0]);
        let decrypted = decrypt_share(encrypted, &target_coeffs[0], Point::from_scalar(&sender_coeffs[0]))
            .unwrap();

        assert_eq!(decrypted, eval_polynomial(&sender_coeffs, 2));
    }

    #[test]
    fn group_id_is_deterministic() {
        let participants = vec![
            Participant { id: 1, address: [1u8; 20] },
            Participant { id: 2, address: [2u8; 20] },
            Participant { id: 3, address: [3u8; 20] },
        ];
        let context = [9u8; 32];
        let a = calc_group_id(&participants, 2, &context);
        let b = calc_group_id(&participants, 2, &context);
        assert_eq!(a, b);
    }
}
