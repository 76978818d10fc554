//! Fixed-capacity pool of pending transactions, keyed by transaction
//! hash. Eviction policy is none: a full pool rejects new entries.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::crypto::Hash32;
use crate::transaction::Transaction;
use crate::MEMPOOL_SIZE;

/// Errors surfaced by mempool insertion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool is full")]
    Full,
    #[error("transaction is invalid")]
    Invalid,
    #[error("transaction already pending")]
    Duplicate,
}

/// Pending transactions awaiting block inclusion.
///
/// Keys are transaction hashes; iteration order is the key order, so
/// `take` is deterministic for a given set of pending transactions.
#[derive(Debug, Default, Clone)]
pub struct Mempool {
    txs: BTreeMap<Hash32, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending transaction.
    pub fn push(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if !tx.is_valid() {
            return Err(MempoolError::Invalid);
        }
        let hash = tx.hash();
        if self.txs.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }
        if self.txs.len() >= MEMPOOL_SIZE {
            return Err(MempoolError::Full);
        }
        self.txs.insert(hash, tx);
        Ok(())
    }

    /// Remove and return a pending transaction by hash.
    pub fn remove(&mut self, hash: &Hash32) -> Option<Transaction> {
        self.txs.remove(hash)
    }

    /// Whether a transaction is pending.
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.txs.contains_key(hash)
    }

    /// Remove and return up to `n` transactions in key order.
    pub fn take(&mut self, n: usize) -> Vec<Transaction> {
        let hashes: Vec<Hash32> = self.txs.keys().take(n).copied().collect();
        hashes
            .iter()
            .filter_map(|hash| self.txs.remove(hash))
            .collect()
    }

    /// Number of pending transactions.
    pub fn height(&self) -> u64 {
        self.txs.len() as u64
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
