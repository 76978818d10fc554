//! The concurrent TCP gossip peer.
//!
//! A node runs one accept loop, one reader task per connection, and one
//! writer task per peer per broadcast. Two locks guard its state: the
//! main mutex over connections, the seen-set, and handler routes, and
//! the route mutex held for the whole of a handler invocation so that
//! handlers on one node are serialized. The route mutex is the outer
//! lock; the two are never held together.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

use crate::message::{read_message, write_package, Message, MsgType};
use crate::{NetConfig, NetError, Result, IS_CLIENT, IS_NODE};

/// Handler invoked for one dispatched message.
///
/// Runs with the route mutex held: handlers are serialized per node and
/// must not block on unbounded I/O. `broadcast` is safe to call (writes
/// are fire-and-forget); reading from the network is not.
pub type HandleFunc = Arc<dyn Fn(&Node, &Conn, &Message) + Send + Sync>;

struct ConnInner {
    id: u64,
    addr: SocketAddr,
    writer: AsyncMutex<OwnedWriteHalf>,
    close: Notify,
}

/// Shared handle to one peer connection.
#[derive(Clone)]
pub struct Conn(Arc<ConnInner>);

impl Conn {
    fn new(id: u64, addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self(Arc::new(ConnInner {
            id,
            addr,
            writer: AsyncMutex::new(writer),
            close: Notify::new(),
        }))
    }

    /// Remote address of this connection.
    pub fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    /// Write one message to this peer.
    pub async fn send(&self, msg: &Message) -> io::Result<()> {
        self.send_bytes(&msg.to_bytes()).await
    }

    async fn send_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.0.writer.lock().await;
        write_package(&mut *writer, bytes).await
    }

    fn id(&self) -> u64 {
        self.0.id
    }

    fn close(&self) {
        self.0.close.notify_waiters();
    }
}

impl PartialEq for Conn {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Conn {}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.0.id)
            .field("addr", &self.0.addr)
            .finish()
    }
}

struct NodeState {
    connections: HashMap<u64, Conn>,
    /// Accepted or dialing connections that have not registered yet.
    /// Counted against `conn_size` so a burst of inbound connections
    /// cannot overshoot the cap while their role bytes are in flight.
    reserved: usize,
    mapping: HashSet<String>,
    routes: HashMap<MsgType, HandleFunc>,
}

struct NodeInner {
    cfg: NetConfig,
    state: StdMutex<NodeState>,
    route_mtx: AsyncMutex<()>,
    next_id: AtomicU64,
}

/// A gossip peer: listens, dials, dedups flooded messages, and
/// dispatches them to registered handlers.
///
/// `Node` is a cheap handle; clones share one peer. Spawned tasks hold
/// clones, so the node outlives the scope that created it.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(cfg: NetConfig) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                cfg,
                state: StdMutex::new(NodeState {
                    connections: HashMap::new(),
                    reserved: 0,
                    mapping: HashSet::new(),
                    routes: HashMap::new(),
                }),
                route_mtx: AsyncMutex::new(()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this node runs with.
    pub fn config(&self) -> &NetConfig {
        &self.inner.cfg
    }

    /// Bind a TCP listener and spawn the accept loop. Returns the bound
    /// address; binding failure is the only fatal setup error.
    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let node = self.clone();
        tokio::spawn(async move { node.accept_loop(listener).await });
        Ok(local)
    }

    /// Dial a peer, announce the node role, register the connection, and
    /// spawn its reader.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<Conn> {
        if !self.reserve_slot() {
            return Err(NetError::TooManyPeers);
        }
        match self.dial(addr).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Dialing half of `connect`; runs under a reserved slot.
    async fn dial<A: ToSocketAddrs>(&self, addr: A) -> Result<Conn> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(&[IS_NODE]).await?;
        let conn = self.commit_slot(peer, writer);
        self.spawn_reader(conn.clone(), reader);
        Ok(conn)
    }

    /// Close and deregister a connection.
    pub fn disconnect(&self, conn: &Conn) {
        self.deregister(conn);
    }

    /// Register a handler for a message type. Later registrations for
    /// the same type replace earlier ones.
    pub fn handle<F>(&self, head: MsgType, handler: F) -> &Self
    where
        F: Fn(&Node, &Conn, &Message) + Send + Sync + 'static,
    {
        self.state().routes.insert(head, Arc::new(handler));
        self
    }

    /// Mark the message as seen, then write it to every current peer,
    /// one fire-and-forget writer task each. Slow peers are absorbed by
    /// TCP buffers and eventually by their reader's failure counter.
    pub fn broadcast(&self, msg: &Message) {
        self.set_mapping(msg.hash());
        let bytes = msg.to_bytes();
        for conn in self.connections() {
            let bytes = bytes.clone();
            tokio::spawn(async move {
                if let Err(err) = conn.send_bytes(&bytes).await {
                    debug!(peer = %conn.addr(), %err, "broadcast write failed");
                }
            });
        }
    }

    /// Snapshot of the current peer set.
    pub fn connections(&self) -> Vec<Conn> {
        self.state().connections.values().cloned().collect()
    }

    /// The route mutex serializing handler invocations. Callers that
    /// mutate handler-owned state outside a handler take this lock.
    pub fn mutex(&self) -> &AsyncMutex<()> {
        &self.inner.route_mtx
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            };
            // Reserve before handing off so a burst of accepts cannot
            // pass the capacity check together; dropping the stream
            // closes the refused connection.
            if !self.reserve_slot() {
                debug!(%addr, "refused connection at capacity");
                continue;
            }
            let node = self.clone();
            tokio::spawn(async move { node.admit(stream, addr).await });
        }
    }

    /// Read the role byte of an accepted connection and settle its
    /// reserved slot: peers commit it, everything else releases it.
    async fn admit(self, mut stream: TcpStream, addr: SocketAddr) {
        let mut role = [0u8; 1];
        if stream.read_exact(&mut role).await.is_err() {
            self.release_slot();
            return;
        }
        match role[0] {
            IS_NODE => {
                let (reader, writer) = stream.into_split();
                let conn = self.commit_slot(addr, writer);
                self.spawn_reader(conn, reader);
            }
            IS_CLIENT => {
                // Clients never join the peer set and do not hold a slot.
                // TODO: answer one-shot client requests. Today the
                // connection is read like a peer but never registered,
                // so nothing is ever written back to the client.
                self.release_slot();
                let (reader, writer) = stream.into_split();
                let conn = Conn::new(self.next_id(), addr, writer);
                self.spawn_reader(conn, reader);
            }
            _ => {
                self.release_slot();
                debug!(%addr, role = role[0], "unknown role byte");
            }
        }
    }

    fn spawn_reader(&self, conn: Conn, reader: OwnedReadHalf) {
        let node = self.clone();
        tokio::spawn(async move { node.read_loop(conn, reader).await });
    }

    async fn read_loop(self, conn: Conn, mut reader: OwnedReadHalf) {
        let closed = conn.0.close.notified();
        tokio::pin!(closed);

        let mut failures = 0u32;
        while failures < self.inner.cfg.retry_size {
            let msg = tokio::select! {
                _ = &mut closed => break,
                read = read_message(&mut reader, self.inner.cfg.max_package_size) => match read {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        failures += 1;
                        continue;
                    }
                    Err(_) => break,
                },
            };

            let hash = msg.hash();
            if self.in_mapping(&hash) {
                continue;
            }
            self.set_mapping(hash);

            if self.dispatch(&conn, &msg).await {
                failures = 0;
            } else {
                failures += 1;
            }
        }

        self.deregister(&conn);
        debug!(peer = %conn.addr(), "connection closed");
    }

    /// Look up and run the handler for the message under the route
    /// mutex. A missing handler counts as a dispatch failure.
    async fn dispatch(&self, conn: &Conn, msg: &Message) -> bool {
        let _route = self.inner.route_mtx.lock().await;
        let handler = self.state().routes.get(&msg.head()).cloned();
        match handler {
            Some(handler) => {
                handler(self, conn, msg);
                true
            }
            None => false,
        }
    }

    /// Claim one connection slot; `false` when registered plus pending
    /// connections already fill `conn_size`.
    fn reserve_slot(&self) -> bool {
        let mut state = self.state();
        if state.connections.len() + state.reserved >= self.inner.cfg.conn_size {
            return false;
        }
        state.reserved += 1;
        true
    }

    /// Give back a slot that never registered.
    fn release_slot(&self) {
        let mut state = self.state();
        state.reserved = state.reserved.saturating_sub(1);
    }

    /// Turn a reserved slot into a registered peer connection.
    fn commit_slot(&self, addr: SocketAddr, writer: OwnedWriteHalf) -> Conn {
        let conn = Conn::new(self.next_id(), addr, writer);
        let mut state = self.state();
        state.reserved = state.reserved.saturating_sub(1);
        state.connections.insert(conn.id(), conn.clone());
        conn
    }

    fn deregister(&self, conn: &Conn) {
        self.state().connections.remove(&conn.id());
        conn.close();
    }

    fn in_mapping(&self, hash: &str) -> bool {
        self.state().mapping.contains(hash)
    }

    fn set_mapping(&self, hash: String) {
        let mut state = self.state();
        if state.mapping.len() >= self.inner.cfg.mapp_size {
            if let Some(victim) = state.mapping.iter().next().cloned() {
                state.mapping.remove(&victim);
            }
        }
        state.mapping.insert(hash);
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.inner.state.lock().expect("node state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::sleep;

    fn test_config() -> NetConfig {
        NetConfig {
            conn_size: 4,
            mapp_size: 16,
            retry_size: 3,
            max_package_size: 1024,
        }
    }

    fn counting_handler(node: &Node, head: MsgType) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        node.handle(head, move |_, _, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn gossip_dedup_dispatches_once() {
        let node = Node::new(test_config());
        let count = counting_handler(&node, 7);
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&[IS_NODE]).await.unwrap();
        let bytes = Message::new(7, b"flood".to_vec()).to_bytes();
        write_package(&mut peer, &bytes).await.unwrap();
        write_package(&mut peer, &bytes).await.unwrap();

        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhaustion_closes_connection() {
        let node = Node::new(test_config());
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&[IS_NODE]).await.unwrap();
        wait_until(|| node.connections().len() == 1).await;

        for _ in 0..test_config().retry_size {
            write_package(&mut peer, b"not a message").await.unwrap();
        }
        wait_until(|| node.connections().is_empty()).await;
    }

    #[tokio::test]
    async fn unhandled_messages_count_toward_retry() {
        let node = Node::new(test_config());
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&[IS_NODE]).await.unwrap();
        wait_until(|| node.connections().len() == 1).await;

        for n in 0..test_config().retry_size {
            let msg = Message::new(99, vec![n as u8]);
            write_package(&mut peer, &msg.to_bytes()).await.unwrap();
        }
        wait_until(|| node.connections().is_empty()).await;
    }

    #[tokio::test]
    async fn broadcast_reaches_peer() {
        let receiver = Node::new(test_config());
        let count = counting_handler(&receiver, 2);
        let addr = receiver.listen("127.0.0.1:0").await.unwrap();

        let sender = Node::new(test_config());
        sender.connect(addr).await.unwrap();
        wait_until(|| receiver.connections().len() == 1).await;

        sender.broadcast(&Message::new(2, b"hello".to_vec()));
        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn broadcast_suppresses_own_copies() {
        let node = Node::new(test_config());
        let count = counting_handler(&node, 9);
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let msg = Message::new(9, b"mine".to_vec());
        node.broadcast(&msg);

        // The broadcast marked the hash seen: an incoming copy of our
        // own message is dropped before dispatch.
        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&[IS_NODE]).await.unwrap();
        write_package(&mut peer, &msg.to_bytes()).await.unwrap();

        let other = Message::new(9, b"other".to_vec());
        write_package(&mut peer, &other.to_bytes()).await.unwrap();
        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inbound_refused_at_capacity() {
        let cfg = NetConfig {
            conn_size: 1,
            ..test_config()
        };
        let node = Node::new(cfg);
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(&[IS_NODE]).await.unwrap();
        wait_until(|| node.connections().len() == 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(&[IS_NODE]).await.unwrap();
        // The refused socket is dropped server-side: clean EOF or reset.
        let mut buf = [0u8; 1];
        assert!(matches!(second.read(&mut buf).await, Ok(0) | Err(_)));
        assert_eq!(node.connections().len(), 1);
    }

    #[tokio::test]
    async fn inbound_burst_never_overshoots_capacity() {
        let cfg = NetConfig {
            conn_size: 2,
            ..test_config()
        };
        let node = Node::new(cfg);
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        // Open conn_size + 2 connections without waiting in between, so
        // several role bytes are in flight while the accept loop runs.
        let mut streams = Vec::new();
        for _ in 0..4 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&[IS_NODE]).await.unwrap();
            streams.push(stream);
        }

        wait_until(|| node.connections().len() == 2).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(node.connections().len(), 2);
    }

    #[tokio::test]
    async fn connect_respects_capacity() {
        let listener = Node::new(test_config());
        let addr = listener.listen("127.0.0.1:0").await.unwrap();

        let full = Node::new(NetConfig {
            conn_size: 0,
            ..test_config()
        });
        assert!(matches!(
            full.connect(addr).await,
            Err(NetError::TooManyPeers)
        ));
    }

    #[tokio::test]
    async fn bind_error_surfaces() {
        let first = Node::new(test_config());
        let addr = first.listen("127.0.0.1:0").await.unwrap();

        let second = Node::new(test_config());
        assert!(matches!(second.listen(addr).await, Err(NetError::Io(_))));
    }

    #[tokio::test]
    async fn client_role_is_served_but_not_registered() {
        let node = Node::new(test_config());
        let count = counting_handler(&node, 5);
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[IS_CLIENT]).await.unwrap();
        let msg = Message::new(5, b"request".to_vec());
        write_package(&mut client, &msg.to_bytes()).await.unwrap();

        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        assert!(node.connections().is_empty());
    }

    #[tokio::test]
    async fn unknown_role_is_dropped() {
        let node = Node::new(test_config());
        let addr = node.listen("127.0.0.1:0").await.unwrap();

        let mut stranger = TcpStream::connect(addr).await.unwrap();
        stranger.write_all(&[0xFF]).await.unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(stranger.read(&mut buf).await, Ok(0) | Err(_)));
        assert!(node.connections().is_empty());
    }

    #[tokio::test]
    async fn disconnect_deregisters() {
        let listener = Node::new(test_config());
        let addr = listener.listen("127.0.0.1:0").await.unwrap();

        let dialer = Node::new(test_config());
        let conn = dialer.connect(addr).await.unwrap();
        assert_eq!(dialer.connections().len(), 1);

        dialer.disconnect(&conn);
        assert!(dialer.connections().is_empty());
    }

    #[tokio::test]
    async fn mapping_eviction_keeps_bound() {
        let cfg = NetConfig {
            mapp_size: 4,
            ..test_config()
        };
        let node = Node::new(cfg);
        for n in 0..10u8 {
            node.set_mapping(Message::new(1, vec![n]).hash());
        }
        assert!(node.state().mapping.len() <= 4);
    }
}
