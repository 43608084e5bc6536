//! FROST signing: Lagrange coefficients, binding factors, signature shares,
//! and aggregation (§4.2).

use crate::constants::{CHAL_TAG, RHO_TAG};
use crate::crypto::{hash_to_scalar, Point, Scalar, SchnorrSignature};
use crate::model::ParticipantId;
use std::collections::{BTreeMap, BTreeSet};

/// `λ_i(S) = Π_{j∈S, j≠i} j / (j − i) mod N`.
pub fn lagrange_coefficient(
    signer_index: ParticipantId,
    all_signer_indices: &BTreeSet<ParticipantId>,
) -> anyhow::Result<Scalar> {
    let mut num = Scalar::one();
    let mut den = Scalar::one();

    for &j in all_signer_indices {
        if j == signer_index {
            continue;
        }
        let j_s = Scalar::from(j);
        let i_s = Scalar::from(signer_index);
        num = num * j_s;
        den = den * (j_s - i_s);
    }

    let den_inv = den
        .invert()
        .ok_or(crate::errors::CryptoError::ZeroScalarInversion)?;

    Ok(num * den_inv)
}

/// `ρ_i = H1(id_i ‖ m ‖ encode(signers, D, E))`.
pub fn binding_factor(
    id: ParticipantId,
    message: &[u8; 32],
    revealed: &BTreeMap<ParticipantId, (Point, Point)>,
) -> Scalar {
    let mut parts: Vec<Vec<u8>> = vec![id.to_be_bytes().to_vec(), message.to_vec()];
    for (signer, (d, e)) in revealed {
        parts.push(signer.to_be_bytes().to_vec());
        parts.push(d.to_bytes().to_vec());
        parts.push(e.to_bytes().to_vec());
    }
    let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();

    let mut rho = hash_to_scalar(RHO_TAG, &refs);
    if rho == Scalar::zero() {
        rho = Scalar::one();
    }
    rho
}

pub fn group_commitment(
    revealed: &BTreeMap<ParticipantId, (Point, Point)>,
    bindings: &BTreeMap<ParticipantId, Scalar>,
) -> Point {
    revealed
        .iter()
        .map(|(id, (d, e))| *d + e.multiply(&bindings[id]))
        .sum()
}

fn challenge(group_public_key: Point, r: Point, message: &[u8; 32]) -> Scalar {
    hash_to_scalar(
        CHAL_TAG,
        &[&r.to_bytes(), &group_public_key.to_bytes(), message],
    )
}

/// `z_i = d_i + e_i·ρ_i + λ_i(S)·c·signing_share_i`.
#[allow(clippy::too_many_arguments)]
pub fn signature_share(
    own_id: ParticipantId,
    hiding_nonce: &Scalar,
    binding_nonce: &Scalar,
    signing_share: &Scalar,
    rho_i: Scalar,
    lambda_i: Scalar,
    group_public_key: Point,
    group_r: Point,
    message: &[u8; 32],
) -> Scalar {
    let _ = own_id;
    let c = challenge(group_public_key, group_r, message);
    *hiding_nonce + *binding_nonce * rho_i + lambda_i * c * *signing_share
}

/// `g·z_i == (D_i + E_i·ρ_i) + verification_share_i · (λ_i(S)·c)`.
pub fn is_share_valid(
    verification_share: Point,
    lambda_i: Scalar,
    own_commitment: Point,
    group_r: Point,
    group_public_key: Point,
    message: &[u8; 32],
    z_i: Scalar,
) -> bool {
    let _ = group_r;
    let c = challenge(group_public_key, group_r, message);
    let lhs = Point::from_scalar(&z_i);
    let rhs = own_commitment + verification_share.multiply(&(lambda_i * c));
    lhs.equals(&rhs)
}

/// Combines per-signer shares into the final `(R, Σz)` signature, or
/// returns the set of misbehaving signer ids if any share is invalid.
#[allow(clippy::too_many_arguments)]
pub fn aggregate(
    group_public_key: Point,
    group_r: Point,
    message: &[u8; 32],
    verification_shares: &BTreeMap<ParticipantId, Point>,
    own_commitments: &BTreeMap<ParticipantId, Point>,
    lagrange_coefficients: &BTreeMap<ParticipantId, Scalar>,
    shares: &BTreeMap<ParticipantId, Scalar>,
) -> Result<SchnorrSignature, BTreeSet<ParticipantId>> {
    let invalid: BTreeSet<ParticipantId> = shares
        .keys()
        .copied()
        .filter(|id| {
            !is_share_valid(
                verification_shares[id],
                lagrange_coefficients[id],
                own_commitments[id],
                group_r,
                group_public_key,
                message,
                shares[id],
            )
        })
        .collect();

    if invalid.is_empty() {
        let z: Scalar = shares.values().copied().sum();
        Ok(SchnorrSignature { r: group_r, z })
    } else {
        Err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagrange_coefficient_with_one_party_is_one() {
        let idxs: BTreeSet<ParticipantId> = [1].into_iter().collect();
        let coeff = lagrange_coefficient(1, &idxs).unwrap();
        assert_eq!(coeff, Scalar::one());
    }

    #[test]
    fn end_to_end_two_of_three_signing() {
        use crate::frost::keygen::{eval_commitment, eval_polynomial};

        let mut rng = rand::thread_rng();

        // A genuine 2-of-3 Shamir sharing of a single secret polynomial,
        // standing in for a completed DKG with one implicit dealer.
        let coefficients = vec![Scalar::random(&mut rng), Scalar::random(&mut rng)];
        let commitments = vec![
            Point::from_scalar(&coefficients[0]),
            Point::from_scalar(&coefficients[1]),
        ];
        let group_public_key = commitments[0];

        let secrets: BTreeMap<ParticipantId, Scalar> = [1, 2, 3]
            .iter()
            .map(|&id| (id, eval_polynomial(&coefficients, id)))
            .collect();
        let verification_shares: BTreeMap<ParticipantId, Point> = [1, 2, 3]
            .iter()
            .map(|&id| (id, eval_commitment(&commitments, id)))
            .collect();

        let signers: BTreeSet<ParticipantId> = [1, 2].into_iter().collect();
        let message = [3u8; 32];

        let nonces: BTreeMap<ParticipantId, (Scalar, Scalar)> = signers
            .iter()
            .map(|&id| (id, (Scalar::random(&mut rng), Scalar::random(&mut rng))))
            .collect();
        let revealed: BTreeMap<ParticipantId, (Point, Point)> = nonces
            .iter()
            .map(|(id, (d, e))| (*id, (Point::from_scalar(d), Point::from_scalar(e))))
            .collect();

        let bindings: BTreeMap<ParticipantId, Scalar> = signers
            .iter()
            .map(|&id| (id, binding_factor(id, &message, &revealed)))
            .collect();

        let r = group_commitment(&revealed, &bindings);

        let lambdas: BTreeMap<ParticipantId, Scalar> = signers
            .iter()
            .map(|&id| (id, lagrange_coefficient(id, &signers).unwrap()))
            .collect();

        // Each signer's "signing share" reconstructs the secret weighted by
        // its own lambda against the signer subset (standard FROST shard).
        let shares: BTreeMap<ParticipantId, Scalar> = signers
            .iter()
            .map(|&id| {
                let (d, e) = nonces[&id];
                let z = signature_share(
                    id,
                    &d,
                    &e,
                    &secrets[&id],
                    bindings[&id],
                    lambdas[&id],
                    group_public_key,
                    r,
                    &message,
                );
                (id, z)
            })
            .collect();

        let own_commitments: BTreeMap<ParticipantId, Point> =
            revealed.iter().map(|(id, (d, e))| (*id, *d + e.multiply(&bindings[id]))).collect();

        let sig = aggregate(
            group_public_key,
            r,
            &message,
            &verification_shares,
            &own_commitments,
            &lambdas,
            &shares,
        )
        .expect("all shares should verify");

        assert!(sig.verify(group_public_key, &message));
    }
}
