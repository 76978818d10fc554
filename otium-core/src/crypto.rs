//! Cryptographic collaborator: Ed25519 keys and BLAKE3 hashing.
//!
//! Everything the chain and the network need from cryptography goes
//! through this module: content hashing, block/transaction signatures,
//! and the stable textual address used to order validators.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Standard hash length (256 bits).
pub const HASH_LEN: usize = 32;

/// 32-byte hash type used throughout the codebase.
pub type Hash32 = [u8; HASH_LEN];

/// Ed25519 seed width in bytes.
pub const KEY_SIZE: usize = 32;

/// Address length in bytes (truncated public-key hash).
pub const ADDRESS_LEN: usize = 20;

/// Hash a byte string with BLAKE3.
pub fn hash(data: &[u8]) -> Hash32 {
    *blake3::hash(data).as_bytes()
}

/// Private signing key. Never serialized by this crate.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; KEY_SIZE]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// The 32-byte seed, for operator backup.
    pub fn to_seed(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Sign a byte string.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.0.sign(msg))
    }

    /// The corresponding public key.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

/// Public verification key identifying a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Verify a signature over a byte string.
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> bool {
        self.0.verify(msg, &sig.0).is_ok()
    }

    /// Stable textual identifier: hex of the first 20 bytes of
    /// `blake3(pubkey)`. Lexicographic order on addresses is the
    /// deterministic validator ordering.
    pub fn address(&self) -> String {
        let digest = hash(self.0.as_bytes());
        hex::encode(&digest[..ADDRESS_LEN])
    }

    /// Raw key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parse raw key bytes; `None` if they do not form a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&arr).ok().map(Self)
    }
}

/// Detached Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(ed25519_dalek::Signature);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"payload");
        assert!(key.public().verify(b"payload", &sig));
        assert!(!key.public().verify(b"tampered", &sig));
        assert!(!PrivateKey::generate().public().verify(b"payload", &sig));
    }

    #[test]
    fn seed_round_trip() {
        let key = PrivateKey::generate();
        let again = PrivateKey::from_seed(&key.to_seed());
        assert_eq!(key.public(), again.public());
    }

    #[test]
    fn address_is_stable_hex() {
        let pubkey = PrivateKey::from_seed(&[7u8; KEY_SIZE]).public();
        let addr = pubkey.address();
        assert_eq!(addr.len(), ADDRESS_LEN * 2);
        assert_eq!(addr, pubkey.address());
        assert!(addr.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pubkey_bytes_round_trip() {
        let pubkey = PrivateKey::generate().public();
        assert_eq!(PublicKey::from_bytes(&pubkey.to_bytes()), Some(pubkey));
        assert_eq!(PublicKey::from_bytes(b"short"), None);
    }
}
