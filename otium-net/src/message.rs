//! The gossip message envelope and its wire framing.
//!
//! A message's serialization is the canonical `(head, nonce, body)`
//! layout; its hash over that serialization is the flood-dedup identity.
//! On the wire each message travels in one package: a fixed-width length
//! prefix followed by exactly that many payload bytes.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 32-bit tag selecting the handler for a message.
pub type MsgType = u32;

/// Nonce width in bytes. The nonce distinguishes otherwise-identical
/// payloads so repeated broadcasts are not collapsed by dedup.
pub const NONCE_LEN: usize = 32;

/// One gossip envelope: handler tag, dedup nonce, opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    head: MsgType,
    nonce: Vec<u8>,
    body: Vec<u8>,
}

impl Message {
    /// Build a message with a fresh random nonce.
    pub fn new(head: MsgType, body: Vec<u8>) -> Self {
        let nonce: [u8; NONCE_LEN] = rand::random();
        Self {
            head,
            nonce: nonce.to_vec(),
            body,
        }
    }

    /// The handler tag.
    pub fn head(&self) -> MsgType {
        self.head
    }

    /// The opaque payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The dedup nonce.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Canonical serialization of `(head, nonce, body)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("message serialize")
    }

    /// Parse a canonical serialization; `None` when undecodable.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        postcard::from_bytes(bytes).ok()
    }

    /// Stable textual identity used as the gossip dedup key.
    pub fn hash(&self) -> String {
        hex::encode(blake3::hash(&self.to_bytes()).as_bytes())
    }
}

/// Write one length-prefixed package.
pub async fn write_package<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "package too large"))?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Serialize and write one message as a package.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_package(writer, &msg.to_bytes()).await
}

/// Read one package and parse the message inside it.
///
/// `Ok(None)` means the frame arrived but did not decode; `Err` means
/// the stream failed or announced a payload larger than `max` bytes.
pub async fn read_message<R>(reader: &mut R, max: usize) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "package exceeds size limit",
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Message::from_bytes(&payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024;

    #[test]
    fn bytes_round_trip() {
        let msg = Message::new(7, b"payload".to_vec());
        assert_eq!(Message::from_bytes(&msg.to_bytes()), Some(msg.clone()));
        assert_eq!(msg.head(), 7);
        assert_eq!(msg.body(), b"payload");
        assert_eq!(msg.nonce().len(), NONCE_LEN);
    }

    #[test]
    fn hash_is_stable_and_nonce_sensitive() {
        let msg = Message::new(1, b"same".to_vec());
        assert_eq!(msg.hash(), msg.clone().hash());
        // Same head and body, fresh nonce: distinct gossip identity.
        assert_ne!(msg.hash(), Message::new(1, b"same".to_vec()).hash());
    }

    #[tokio::test]
    async fn framing_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(MAX);
        let msg = Message::new(3, vec![0xAB; 100]);

        write_message(&mut client, &msg).await.unwrap();
        let read = read_message(&mut server, MAX).await.unwrap();
        assert_eq!(read, Some(msg));
    }

    #[tokio::test]
    async fn undecodable_frame_reads_as_none() {
        let (mut client, mut server) = tokio::io::duplex(MAX);
        write_package(&mut client, b"\xFF\xFF\xFF\xFF not a message")
            .await
            .unwrap();
        assert_eq!(read_message(&mut server, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(MAX);
        client.write_u32(u32::MAX).await.unwrap();
        let err = read_message(&mut server, MAX).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(MAX);
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        assert!(read_message(&mut server, MAX).await.is_err());
    }
}
