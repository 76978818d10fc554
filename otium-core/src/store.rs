//! Block-store seam between chain logic and persistence.
//!
//! The chain runs on the in-memory [`MemStore`]; a keyed store using the
//! key schema below is the drop-in replacement once persistence lands.

use crate::block::Block;
use crate::crypto::Hash32;

/// Key under which the chain height is stored.
pub const KEY_HEIGHT: &str = "chain.blocks.height";

/// Key under which the mempool height is stored.
pub const KEY_MEMPOOL_HEIGHT: &str = "chain.mempool.height";

/// Prefix shared by all mempool transaction keys.
pub const KEY_MEMPOOL_PREFIX_TX: &str = "chain.mempool.tx[";

/// Key for the block at a given index.
pub fn block_key(index: u64) -> String {
    format!("chain.blocks.block[{index}]")
}

/// Key mapping a transaction hash to its containing block.
pub fn tx_key(hash: &Hash32) -> String {
    format!("chain.txs.tx[{}]", hex::encode_upper(hash))
}

/// Key for a pending mempool transaction.
pub fn mempool_tx_key(hash: &Hash32) -> String {
    format!("{}{}]", KEY_MEMPOOL_PREFIX_TX, hex::encode_upper(hash))
}

/// An ordered, append-only block store.
pub trait BlockStore {
    /// Block at `index`, if present.
    fn get(&self, index: u64) -> Option<&Block>;

    /// Block whose content hash equals `hash`, if present.
    fn get_by_hash(&self, hash: &Hash32) -> Option<&Block>;

    /// Append a block to the tail.
    fn push(&mut self, block: Block);

    /// Number of stored blocks.
    fn len(&self) -> u64;

    /// True when no blocks are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the tail block, if any.
    fn last_hash(&self) -> Option<Hash32>;
}

/// Vec-backed in-memory block store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    blocks: Vec<Block>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored blocks in chain order.
    pub fn as_slice(&self) -> &[Block] {
        &self.blocks
    }
}

impl BlockStore for MemStore {
    fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(index).ok()?)
    }

    fn get_by_hash(&self, hash: &Hash32) -> Option<&Block> {
        self.blocks.iter().find(|block| &block.hash() == hash)
    }

    fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn last_hash(&self) -> Option<Hash32> {
        self.blocks.last().map(Block::hash)
    }
}
