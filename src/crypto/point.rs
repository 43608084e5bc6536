//! secp256k1 point arithmetic (§4.1). Points are kept in projective form
//! for cheap addition and only converted to affine/compressed bytes at
//! serialization boundaries.

use super::scalar::Scalar;
use k256::elliptic_curve::group::GroupEncoding;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{AffinePoint, ProjectivePoint};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, Neg};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point(ProjectivePoint);

impl Default for Point {
    fn default() -> Self {
        Point::identity()
    }
}

impl Point {
    pub fn identity() -> Self {
        Self(ProjectivePoint::IDENTITY)
    }

    pub fn generator() -> Self {
        Self(ProjectivePoint::GENERATOR)
    }

    /// `g(scalar) = BASE · scalar`.
    pub fn from_scalar(scalar: &Scalar) -> Self {
        Self(ProjectivePoint::GENERATOR * scalar.inner())
    }

    pub fn multiply(&self, scalar: &Scalar) -> Self {
        Self(self.0 * scalar.inner())
    }

    pub fn is_identity(&self) -> bool {
        self.0 == ProjectivePoint::IDENTITY
    }

    pub fn equals(&self, other: &Point) -> bool {
        self.0 == other.0
    }

    /// 33-byte SEC1 compressed encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        let encoded = self.0.to_affine().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 33]) -> Option<Self> {
        let affine = AffinePoint::from_bytes(bytes.into());
        Option::<AffinePoint>::from(affine).map(|a| Self(ProjectivePoint::from(a)))
    }

    /// Affine x-coordinate as a 32-byte big-endian array, used for the
    /// ECDH-derived VSS share mask (§4.2).
    pub fn x_coordinate_bytes(&self) -> [u8; 32] {
        let encoded = self.0.to_affine().to_encoded_point(false);
        let mut out = [0u8; 32];
        out.copy_from_slice(&encoded.as_bytes()[1..33]);
        out
    }

    /// `(x, y)` affine coordinates as big-endian 32-byte arrays, used for
    /// the literal `(x, y)` group public key representation in §3.
    pub fn xy_coordinates(&self) -> ([u8; 32], [u8; 32]) {
        let encoded = self.0.to_affine().to_encoded_point(false);
        let bytes = encoded.as_bytes();
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);
        (x, y)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point(-self.0)
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let arr: [u8; 33] = bytes.try_into().map_err(|_| D::Error::custom("expected 33 bytes"))?;
        Point::from_bytes(&arr).ok_or_else(|| D::Error::custom("invalid point encoding"))
    }
}

impl std::iter::Sum for Point {
    fn sum<I: Iterator<Item = Point>>(iter: I) -> Self {
        iter.fold(Point::identity(), |acc, p| acc + p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_compressed_bytes() {
        let mut rng = rand::thread_rng();
        let s = Scalar::random(&mut rng);
        let p = Point::from_scalar(&s);
        let bytes = p.to_bytes();
        assert_eq!(Point::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn generator_times_one_is_generator() {
        assert!(Point::from_scalar(&Scalar::one()).equals(&Point::generator()));
    }

    #[test]
    fn identity_is_additive_identity() {
        let mut rng = rand::thread_rng();
        let s = Scalar::random(&mut rng);
        let p = Point::from_scalar(&s);
        assert!((p + Point::identity()).equals(&p));
    }
}
