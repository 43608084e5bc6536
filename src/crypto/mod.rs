//! Field & curve primitives (C1).

mod hash;
mod point;
mod scalar;

pub use hash::{h4_msg, h5_com, hash_to_scalar};
pub use point::Point;
pub use scalar::Scalar;

/// Verifies a group Schnorr signature `(R, z)` over `message` under public
/// key `public_key`: recomputes `c = H2(R‖Y‖m)` and checks
/// `g·z == R + Y·c` with `R != infinity` (§4.1).
pub fn schnorr_verify(public_key: Point, message: &[u8; 32], r: Point, z: Scalar) -> bool {
    if r.is_identity() {
        return false;
    }
    let challenge = hash_to_scalar(
        crate::constants::CHAL_TAG,
        &[&r.to_bytes(), &public_key.to_bytes(), message],
    );
    let lhs = Point::from_scalar(&z);
    let rhs = r + public_key.multiply(&challenge);
    lhs.equals(&rhs)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchnorrSignature {
    pub r: Point,
    pub z: Scalar,
}

impl SchnorrSignature {
    pub fn verify(&self, public_key: Point, message: &[u8; 32]) -> bool {
        schnorr_verify(public_key, message, self.r, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_party_signature_verifies() {
        let mut rng = rand::thread_rng();
        let private_key = Scalar::random(&mut rng);
        let public_key = Point::from_scalar(&private_key);

        let nonce = Scalar::random(&mut rng);
        let r = Point::from_scalar(&nonce);

        let message = [7u8; 32];
        let challenge = hash_to_scalar(
            crate::constants::CHAL_TAG,
            &[&r.to_bytes(), &public_key.to_bytes(), &message],
        );
        let z = nonce + private_key * challenge;

        assert!(schnorr_verify(public_key, &message, r, z));
    }

    #[test]
    fn tampered_message_fails() {
        let mut rng = rand::thread_rng();
        let private_key = Scalar::random(&mut rng);
        let public_key = Point::from_scalar(&private_key);
        let nonce = Scalar::random(&mut rng);
        let r = Point::from_scalar(&nonce);

        let message = [7u8; 32];
        let challenge = hash_to_scalar(
            crate::constants::CHAL_TAG,
            &[&r.to_bytes(), &public_key.to_bytes(), &message],
        );
        let z = nonce + private_key * challenge;

        let other_message = [8u8; 32];
        assert!(!schnorr_verify(public_key, &other_message, r, z));
    }
}
