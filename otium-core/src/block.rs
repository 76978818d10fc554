//! Blocks: bounded, ordered transaction containers with a validator
//! signature and a back-link to the previous block's hash.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{hash, Hash32, PrivateKey, PublicKey, Signature};
use crate::transaction::Transaction;
use crate::TXS_SIZE;

/// Errors surfaced by block mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block already accepted")]
    AlreadyAccepted,
    #[error("block transaction capacity reached")]
    Full,
    #[error("transaction is invalid")]
    InvalidTx,
}

/// A block under construction or accepted into a chain.
///
/// Lifecycle: construct with a back-link, append individually valid
/// transactions up to [`TXS_SIZE`], then `accept` exactly once to sign
/// and freeze. Acceptance is terminal; every later mutation is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    last_hash: Hash32,
    txs: Vec<Transaction>,
    validator: Option<PublicKey>,
    sig: Option<Signature>,
}

impl Block {
    /// New unsigned, empty block back-linked to `last_hash`.
    pub fn new(last_hash: Hash32) -> Self {
        Self {
            last_hash,
            txs: Vec::new(),
            validator: None,
            sig: None,
        }
    }

    /// Append a transaction.
    pub fn append(&mut self, tx: Transaction) -> Result<(), BlockError> {
        if self.is_accepted() {
            return Err(BlockError::AlreadyAccepted);
        }
        if self.txs.len() >= TXS_SIZE {
            return Err(BlockError::Full);
        }
        if !tx.is_valid() {
            return Err(BlockError::InvalidTx);
        }
        self.txs.push(tx);
        Ok(())
    }

    /// Sign the canonical digest of `(last_hash, txs)` with `priv_key`,
    /// record the validator, and freeze the block.
    pub fn accept(&mut self, priv_key: &PrivateKey) -> Result<(), BlockError> {
        if self.is_accepted() {
            return Err(BlockError::AlreadyAccepted);
        }
        let digest = self.sign_digest();
        self.sig = Some(priv_key.sign(&digest));
        self.validator = Some(priv_key.public());
        Ok(())
    }

    /// True iff accepted, every transaction is valid, and the block
    /// signature verifies under the recorded validator.
    pub fn is_valid(&self) -> bool {
        let (validator, sig) = match (&self.validator, &self.sig) {
            (Some(validator), Some(sig)) => (validator, sig),
            _ => return false,
        };
        if !self.txs.iter().all(Transaction::is_valid) {
            return false;
        }
        validator.verify(&self.sign_digest(), sig)
    }

    /// Content-derived block hash, stable after acceptance.
    pub fn hash(&self) -> Hash32 {
        hash(&self.wrap())
    }

    /// Back-link to the predecessor's hash.
    pub fn last_hash(&self) -> Hash32 {
        self.last_hash
    }

    /// The key that accepted this block, once accepted.
    pub fn validator(&self) -> Option<&PublicKey> {
        self.validator.as_ref()
    }

    /// The ordered transactions.
    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    /// Contiguous transaction subsequence `[lo, hi)`; `None` out of range.
    pub fn range(&self, lo: usize, hi: usize) -> Option<&[Transaction]> {
        self.txs.get(lo..hi)
    }

    /// Transaction count.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// True when the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Whether `accept` has been called.
    pub fn is_accepted(&self) -> bool {
        self.sig.is_some()
    }

    /// Canonical serialization of the full block.
    pub fn wrap(&self) -> Vec<u8> {
        bincode::serialize(self).expect("block serialize")
    }

    /// Parse a block from its `wrap` serialization.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }

    fn sign_digest(&self) -> Hash32 {
        let encoded =
            bincode::serialize(&(&self.last_hash, &self.txs)).expect("block digest serialize");
        hash(&encoded)
    }
}
