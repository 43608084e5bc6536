//! secp256k1 scalar arithmetic modulo the group order `N` (§4.1).

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::PrimeField;
use k256::{Scalar as InnerScalar, U256};
use rand::RngCore;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, Mul, Neg, Sub};
use zeroize::Zeroize;

/// A scalar in `[0, N)`. Wraps `k256::Scalar`; zeroized on drop because
/// this type is also used to carry DKG coefficients and signing shares.
#[derive(Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct Scalar(InnerScalar);

impl std::fmt::Debug for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scalar({})", hex::encode(self.to_bytes()))
    }
}

impl Scalar {
    pub fn zero() -> Self {
        Self(InnerScalar::ZERO)
    }

    pub fn one() -> Self {
        Self(InnerScalar::ONE)
    }

    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 32];
        loop {
            rng.fill_bytes(&mut bytes);
            if let Some(s) = Self::from_bytes(&bytes) {
                if s != Self::zero() {
                    return s;
                }
            }
        }
    }

    /// Reduces an arbitrary-length big-endian hash output modulo `N`,
    /// used by the hash-to-field family (§4.1).
    pub fn from_bytes_mod_order(bytes: &[u8; 32]) -> Self {
        let uint = U256::from_be_slice(bytes);
        Self(<InnerScalar as Reduce<U256>>::reduce(uint))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        InnerScalar::from_repr((*bytes).into())
            .into_option()
            .map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_repr().into()
    }

    pub fn invert(&self) -> Option<Self> {
        Option::<InnerScalar>::from(self.0.invert()).map(Self)
    }

    pub fn inner(&self) -> &InnerScalar {
        &self.0
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Self(InnerScalar::from(value))
    }
}

impl From<InnerScalar> for Scalar {
    fn from(value: InnerScalar) -> Self {
        Self(value)
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar(-self.0)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| D::Error::custom("expected 32 bytes"))?;
        Scalar::from_bytes(&arr).ok_or_else(|| D::Error::custom("scalar out of range"))
    }
}

impl std::iter::Sum for Scalar {
    fn sum<I: Iterator<Item = Scalar>>(iter: I) -> Self {
        iter.fold(Scalar::zero(), |acc, s| acc + s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_bytes() {
        let mut rng = rand::thread_rng();
        let s = Scalar::random(&mut rng);
        let bytes = s.to_bytes();
        assert_eq!(Scalar::from_bytes(&bytes).unwrap(), s);
    }

    #[test]
    fn invert_is_multiplicative_inverse() {
        let mut rng = rand::thread_rng();
        let s = Scalar::random(&mut rng);
        let inv = s.invert().unwrap();
        assert_eq!(s * inv, Scalar::one());
    }

    #[test]
    fn zero_has_no_inverse() {
        assert!(Scalar::zero().invert().is_none());
    }
}
