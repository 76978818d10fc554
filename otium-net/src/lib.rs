//! TCP gossip networking for the Otium blockchain.
//!
//! This crate provides:
//! - The gossip message envelope and its length-prefixed wire framing
//! - A concurrent TCP node: listen, dial, flood-dedup, handler dispatch
//! - Explicit locking discipline: one mutex for node state, one route
//!   mutex serializing handler execution

use thiserror::Error;

pub mod message;
pub mod node;

pub use message::{read_message, write_message, write_package, Message, MsgType, NONCE_LEN};
pub use node::{Conn, HandleFunc, Node};

/// Role byte announcing a dialing peer node.
pub const IS_NODE: u8 = 0x01;

/// Role byte announcing a one-shot client.
pub const IS_CLIENT: u8 = 0x02;

/// Network errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("connection limit reached")]
    TooManyPeers,
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Maximum simultaneous peer connections.
    pub conn_size: usize,
    /// Maximum retained message hashes for gossip dedup; one arbitrary
    /// entry is evicted when the set is full.
    pub mapp_size: usize,
    /// Consecutive per-connection failures tolerated before the
    /// connection is closed.
    pub retry_size: u32,
    /// Largest accepted package payload in bytes. Prevents a hostile
    /// length prefix from exhausting memory.
    pub max_package_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            conn_size: 64,
            mapp_size: 2048,
            retry_size: 8,
            max_package_size: 4 * 1024 * 1024,
        }
    }
}
