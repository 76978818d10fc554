//! Core data structures and validation logic for the Otium blockchain.
//!
//! This crate provides:
//! - Transaction and block structures with Ed25519 validator signatures
//! - The append-only chain and its validation rules
//! - Lazy-interval validator selection
//! - Arbitrary-precision integers for chain height arithmetic
//! - The block-store seam and the in-memory default behind it
//! - A fixed-capacity mempool

pub mod bigint;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod mempool;
pub mod store;
pub mod transaction;

pub use bigint::{BigNum, BigNumError};
pub use block::{Block, BlockError};
pub use chain::{Chain, ChainError};
pub use crypto::{hash, Hash32, PrivateKey, PublicKey, Signature, HASH_LEN, KEY_SIZE};
pub use mempool::{Mempool, MempoolError};
pub use store::{BlockStore, MemStore};
pub use transaction::Transaction;

/// Well-known byte string used as the genesis block's back-link.
pub const CHAIN_ID: Hash32 = *b"otium:genesis:000000000000000001";

/// Maximum number of transactions in a block.
pub const TXS_SIZE: usize = 6;

/// Maximum number of pending transactions in the mempool.
pub const MEMPOOL_SIZE: usize = 1024;
