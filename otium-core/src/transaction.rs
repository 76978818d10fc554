//! Validator-attributed signed payloads.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash, Hash32, PrivateKey, PublicKey, Signature};

/// A signed payload attributed to a validator.
///
/// The signature binds the payload to the attributed key: `is_valid`
/// holds iff the signature verifies under `validator` over the payload
/// hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// The key that issued this transaction.
    pub validator: PublicKey,
    /// Signature over `blake3(payload)`.
    pub sig: Signature,
}

impl Transaction {
    /// Create and sign a transaction.
    pub fn new(priv_key: &PrivateKey, payload: Vec<u8>) -> Self {
        let sig = priv_key.sign(&hash(&payload));
        Self {
            payload,
            validator: priv_key.public(),
            sig,
        }
    }

    /// The issuing validator.
    pub fn validator(&self) -> &PublicKey {
        &self.validator
    }

    /// Check the signature against the attributed validator.
    pub fn is_valid(&self) -> bool {
        self.validator.verify(&hash(&self.payload), &self.sig)
    }

    /// Content-derived transaction ID.
    pub fn hash(&self) -> Hash32 {
        let encoded = bincode::serialize(self).expect("tx serialize");
        hash(&encoded)
    }

    /// Canonical serialization.
    pub fn wrap(&self) -> Vec<u8> {
        bincode::serialize(self).expect("tx serialize")
    }

    /// Parse a transaction from its `wrap` serialization.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_after_signing() {
        let key = PrivateKey::generate();
        let tx = Transaction::new(&key, b"transfer 5".to_vec());
        assert!(tx.is_valid());
        assert_eq!(tx.validator(), &key.public());
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let key = PrivateKey::generate();
        let mut tx = Transaction::new(&key, b"transfer 5".to_vec());
        tx.payload = b"transfer 500".to_vec();
        assert!(!tx.is_valid());
    }

    #[test]
    fn reattributed_validator_is_invalid() {
        let key = PrivateKey::generate();
        let mut tx = Transaction::new(&key, b"transfer 5".to_vec());
        tx.validator = PrivateKey::generate().public();
        assert!(!tx.is_valid());
    }

    #[test]
    fn hash_tracks_content() {
        let key = PrivateKey::generate();
        let a = Transaction::new(&key, b"a".to_vec());
        let b = Transaction::new(&key, b"b".to_vec());
        assert_eq!(a.hash(), a.clone().hash());
        assert_ne!(a.hash(), b.hash());
    }
}
