//! Connection handles
//!
//! A [`Connection`] is the transport identity every stage works with. Stages
//! may decorate it (a WebSocket stage frames outgoing bytes, a WAMP stage adds
//! protocol helpers); decorations keep the [`ConnectionId`] and the
//! [`AttributeStore`] of the connection they wrap.

use crate::attributes::{AttributeStore, REMOTE_ADDRESS, RESOURCE_ID};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a fresh process-unique id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection as seen by a middleware stage
pub trait Connection: Send + Sync + fmt::Debug {
    /// The transport identity, shared by every decoration
    fn id(&self) -> ConnectionId;

    /// Per-connection attributes
    fn attributes(&self) -> &AttributeStore;

    /// Queue bytes for delivery. Fire-and-forget.
    fn send(&self, data: Bytes);

    /// Close the connection
    fn close(&self);

    /// Upcast for downcasting to a concrete decoration
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Shared handle to a connection
pub type ConnectionRef = Arc<dyn Connection>;

/// Downcast a connection handle to a concrete decoration
pub fn downcast_connection<T>(connection: &ConnectionRef) -> Option<Arc<T>>
where
    T: Connection + 'static,
{
    Arc::clone(connection).into_any().downcast::<T>().ok()
}

/// Instructions for the socket writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write these bytes to the socket
    Data(Bytes),
    /// Flush and shut the socket down
    Close,
}

/// A connection backed by a TCP socket
///
/// Sends are queued to the socket's writer task. The connection closes once;
/// anything sent afterwards is dropped.
pub struct SocketConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    attributes: AttributeStore,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl SocketConnection {
    /// Create a connection and record its transport attributes
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let attributes = AttributeStore::new();
        attributes.set(RESOURCE_ID, id);
        attributes.set(REMOTE_ADDRESS, remote_address(&remote_addr));

        Self {
            id,
            remote_addr,
            attributes,
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    /// The peer socket address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Format the peer IP the way it is stored under `remote_address`
fn remote_address(addr: &SocketAddr) -> String {
    addr.ip()
        .to_string()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

impl Connection for SocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    fn send(&self, data: Bytes) {
        if self.is_closed() {
            trace!(connection_id = %self.id, "Dropping send on closed connection");
            return;
        }
        if self.outbound.send(Outbound::Data(data)).is_err() {
            trace!(connection_id = %self.id, "Writer gone, dropping send");
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for SocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_connection() -> (SocketConnection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        (SocketConnection::new(ConnectionId::new(42), addr, tx), rx)
    }

    #[test]
    fn ids_are_monotonic() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert!(second > first);
    }

    #[test]
    fn transport_attributes_are_recorded() {
        let (connection, _rx) = socket_connection();
        assert_eq!(
            connection.attributes().get::<ConnectionId>(RESOURCE_ID),
            Some(ConnectionId::new(42))
        );
        assert_eq!(
            connection.attributes().get::<String>(REMOTE_ADDRESS),
            Some("::1".to_string())
        );
    }

    #[test]
    fn close_happens_once_and_blocks_sends() {
        let (connection, mut rx) = socket_connection();
        connection.send(Bytes::from_static(b"hello"));
        connection.close();
        connection.close();
        connection.send(Bytes::from_static(b"late"));

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Data(Bytes::from_static(b"hello"))
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
        assert!(connection.is_closed());
    }

    #[test]
    fn downcast_finds_concrete_type() {
        let (connection, _rx) = socket_connection();
        let connection: ConnectionRef = Arc::new(connection);
        let socket = downcast_connection::<SocketConnection>(&connection);
        assert!(socket.is_some());
    }
}
