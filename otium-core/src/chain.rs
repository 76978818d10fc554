//! The append-only chain: genesis construction, the append protocol,
//! lookup, and lazy-interval validator selection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bigint::BigNum;
use crate::block::Block;
use crate::crypto::{Hash32, PrivateKey, PublicKey};
use crate::store::{BlockStore, MemStore};
use crate::transaction::Transaction;
use crate::CHAIN_ID;

/// Errors surfaced by chain construction and append.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("genesis is invalid")]
    InvalidGenesis,
    #[error("block is invalid")]
    InvalidBlock,
    #[error("relation is invalid")]
    InvalidRelation,
    #[error("range is out of bounds")]
    RangeOutOfBounds,
}

/// Serialization envelope carrying per-block `wrap` outputs in order.
#[derive(Serialize, Deserialize)]
struct ChainWrap {
    blocks: Vec<Vec<u8>>,
}

/// An append-only sequence of valid blocks starting at genesis.
///
/// Invariants: index 0 is the genesis block back-linked to [`CHAIN_ID`];
/// every later block back-links to its predecessor's hash; every block
/// is individually valid; `length` equals the block count. The chain
/// never shrinks or reorders. Concurrent appends are serialized by the
/// caller.
#[derive(Debug, Clone)]
pub struct Chain {
    store: MemStore,
    length: BigNum,
}

impl Chain {
    /// Build a chain from its genesis block: back-linked to [`CHAIN_ID`],
    /// carrying `txs`, accepted under `priv_key`. Any append failure or
    /// an invalid genesis aborts construction.
    pub fn new(priv_key: &PrivateKey, txs: Vec<Transaction>) -> Result<Self, ChainError> {
        let mut genesis = Block::new(CHAIN_ID);
        for tx in txs {
            genesis
                .append(tx)
                .map_err(|_| ChainError::InvalidGenesis)?;
        }
        genesis
            .accept(priv_key)
            .map_err(|_| ChainError::InvalidGenesis)?;
        if !genesis.is_valid() {
            return Err(ChainError::InvalidGenesis);
        }

        let mut store = MemStore::new();
        store.push(genesis);
        Ok(Self {
            store,
            length: BigNum::from(1),
        })
    }

    /// Current height.
    pub fn length(&self) -> BigNum {
        self.length.clone()
    }

    /// Hash of the tail block.
    pub fn last_hash(&self) -> Hash32 {
        self.store.last_hash().expect("chain has genesis")
    }

    /// Contiguous block slice `[x, y)`.
    pub fn range(&self, x: u64, y: u64) -> Result<&[Block], ChainError> {
        let blocks = self.store.as_slice();
        if x > y || y > blocks.len() as u64 {
            return Err(ChainError::RangeOutOfBounds);
        }
        Ok(&blocks[x as usize..y as usize])
    }

    /// Append a block to the tail.
    ///
    /// The block must be valid and back-link to the current tail hash;
    /// a rejected block leaves the chain unchanged.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        if !block.is_valid() {
            return Err(ChainError::InvalidBlock);
        }
        if block.last_hash() != self.last_hash() {
            return Err(ChainError::InvalidRelation);
        }
        self.store.push(block);
        self.length = self.length.inc();
        Ok(())
    }

    /// Linear scan for the block whose hash equals `hash`.
    pub fn find(&self, hash: &Hash32) -> Option<&Block> {
        self.store.get_by_hash(hash)
    }

    /// Every block individually valid and the back-link chain consistent.
    pub fn is_valid(&self) -> bool {
        let blocks = self.store.as_slice();
        let first = match blocks.first() {
            Some(first) => first,
            None => return false,
        };
        if first.last_hash() != CHAIN_ID {
            return false;
        }
        for (i, block) in blocks.iter().enumerate() {
            if !block.is_valid() {
                return false;
            }
            if i > 0 && block.last_hash() != blocks[i - 1].hash() {
                return false;
            }
        }
        true
    }

    /// Serialize the ordered per-block `wrap` outputs in one envelope.
    pub fn wrap(&self) -> Vec<u8> {
        let envelope = ChainWrap {
            blocks: self.store.as_slice().iter().map(Block::wrap).collect(),
        };
        bincode::serialize(&envelope).expect("chain serialize")
    }

    /// Number of blocks walked back from the tail before `pubkey` appears,
    /// either as a block's validator or as the validator of any contained
    /// transaction. `-1` when the walk falls off the chain without a
    /// sighting: never-seen keys are maximally lazy in the negative
    /// direction.
    pub fn lazy_interval(&self, pubkey: &PublicKey) -> BigNum {
        let mut diff = BigNum::zero();
        let mut block = match self.find(&self.last_hash()) {
            Some(block) => block,
            None => return BigNum::from(-1),
        };

        loop {
            if block.validator() == Some(pubkey) {
                return diff;
            }
            if block.txs().iter().any(|tx| tx.validator() == pubkey) {
                return diff;
            }
            block = match self.find(&block.last_hash()) {
                Some(prev) => prev,
                None => return BigNum::from(-1),
            };
            diff = diff.inc();
        }
    }

    /// Choose the laziest validator: the candidate whose lazy interval is
    /// maximal. Ties sort by address ascending and are broken by the tail
    /// hash reduced to an index, so every honest node picks the same key
    /// for the same chain tail and candidate set. Candidates with a
    /// negative interval never qualify; `None` when nothing qualifies.
    pub fn select_lazy(&self, validators: &[PublicKey]) -> Option<PublicKey> {
        let mut finds: Vec<PublicKey> = Vec::new();
        let mut diff = BigNum::zero();

        for pubkey in validators {
            let lazy = self.lazy_interval(pubkey);
            match lazy.cmp(&diff) {
                Ordering::Greater => {
                    diff = lazy;
                    finds = vec![pubkey.clone()];
                }
                Ordering::Equal => finds.push(pubkey.clone()),
                Ordering::Less => {}
            }
        }

        if finds.len() > 1 {
            finds.sort_by(|a, b| a.address().cmp(&b.address()));
            let rnum = BigNum::load(&self.last_hash()).low_u64();
            let picked = rnum as usize % finds.len();
            return Some(finds.swap_remove(picked));
        }
        finds.into_iter().next()
    }
}
