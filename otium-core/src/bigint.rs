//! Arbitrary-precision integers for chain height and lazy-interval
//! arithmetic.
//!
//! Chain height itself would fit a `u64`, but the lazy-interval walk is
//! unbounded and hash-to-index reduction loads full 32-byte digests, so
//! the arithmetic stays arbitrary-precision and only narrows at the
//! [`BigNum::low_u64`] boundary.

use num_bigint::{BigInt, Sign};
use thiserror::Error;

/// Errors produced when parsing a [`BigNum`] from text.
#[derive(Debug, Error)]
pub enum BigNumError {
    #[error("malformed decimal integer: {0}")]
    Parse(#[from] num_bigint::ParseBigIntError),
}

/// Immutable arbitrary-precision signed integer.
///
/// Every arithmetic operation returns a fresh value; comparison goes
/// through the derived `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigNum(BigInt);

impl BigNum {
    /// Parse a canonical base-10 rendering, with an optional leading `-`.
    pub fn parse(s: &str) -> Result<Self, BigNumError> {
        Ok(Self(s.parse::<BigInt>()?))
    }

    /// Load a non-negative value from its big-endian magnitude encoding.
    /// An empty slice loads as zero.
    pub fn load(bytes: &[u8]) -> Self {
        Self(BigInt::from_bytes_be(Sign::Plus, bytes))
    }

    /// The additive identity.
    pub fn zero() -> Self {
        Self(BigInt::from(0))
    }

    /// Return `self + 1` as a fresh value.
    pub fn inc(&self) -> Self {
        Self(&self.0 + 1)
    }

    /// Minimal big-endian magnitude encoding; empty for zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.0.sign() == Sign::NoSign {
            return Vec::new();
        }
        self.0.magnitude().to_bytes_be()
    }

    /// Low 64 bits of the magnitude, truncating. Used only for indexing
    /// and hash-to-index reduction.
    pub fn low_u64(&self) -> u64 {
        self.0.iter_u64_digits().next().unwrap_or(0)
    }
}

impl From<i64> for BigNum {
    fn from(n: i64) -> Self {
        Self(BigInt::from(n))
    }
}

impl std::fmt::Display for BigNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_display_round_trip() {
        for s in ["0", "1", "-1", "18446744073709551616", "-99999999999999999999"] {
            let n = BigNum::parse(s).unwrap();
            assert_eq!(n.to_string(), s);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(BigNum::parse("").is_err());
        assert!(BigNum::parse("12a3").is_err());
        assert!(BigNum::parse("0x10").is_err());
    }

    #[test]
    fn load_bytes_round_trip() {
        for bytes in [vec![], vec![1], vec![0xFF; 9], vec![1, 0, 0, 0, 0, 0, 0, 0, 0]] {
            let n = BigNum::load(&bytes);
            assert_eq!(BigNum::load(&n.to_bytes()), n);
        }
    }

    #[test]
    fn zero_encodes_empty() {
        assert_eq!(BigNum::zero().to_bytes(), Vec::<u8>::new());
        assert_eq!(BigNum::zero().to_string(), "0");
    }

    #[test]
    fn inc_returns_fresh_value() {
        let one = BigNum::from(1);
        let two = one.inc();
        assert_eq!(one, BigNum::from(1));
        assert_eq!(two, BigNum::from(2));
        assert_eq!(BigNum::from(-1).inc(), BigNum::zero());
    }

    #[test]
    fn compare() {
        assert!(BigNum::from(-1) < BigNum::zero());
        assert!(BigNum::from(7) > BigNum::from(3));
        assert_eq!(BigNum::parse("42").unwrap(), BigNum::from(42));
    }

    #[test]
    fn low_u64_truncates() {
        // 2^64 + 7: the high word is dropped.
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&7u64.to_be_bytes());
        assert_eq!(BigNum::load(&bytes).low_u64(), 7);
        assert_eq!(BigNum::from(7).low_u64(), 7);
        assert_eq!(BigNum::zero().low_u64(), 0);
    }
}
