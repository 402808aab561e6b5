use crate::frame::{close_frame, encode, text_frame};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::Frame;
use wampkit_core::{AttributeStore, Connection, ConnectionId, ConnectionRef};

/// Key holding whether the WebSocket connection is closing
pub const WEBSOCKET_CLOSING: &str = "websocket.closing";

/// A connection that has completed the WebSocket handshake
///
/// Outgoing payloads are sent as text frames. Once closing, sends are dropped.
pub struct WebSocketConnection {
    inner: ConnectionRef,
}

impl WebSocketConnection {
    /// Decorate an upgraded transport connection
    pub fn new(inner: ConnectionRef) -> Self {
        Self { inner }
    }

    /// The transport connection
    pub fn inner(&self) -> &ConnectionRef {
        &self.inner
    }

    /// Whether a close frame has been sent
    pub fn is_closing(&self) -> bool {
        self.inner.attributes().get_or(WEBSOCKET_CLOSING, false)
    }

    /// Write a frame unless the connection is closing
    pub fn send_frame(&self, frame: Frame) {
        if self.is_closing() {
            return;
        }
        self.inner.send(encode(frame));
    }

    /// Send a close frame with `code`, then close the transport
    pub fn close_with(&self, code: CloseCode) {
        if self.is_closing() {
            return;
        }
        self.inner.send(encode(close_frame(code)));
        self.inner.close();
        self.inner.attributes().set(WEBSOCKET_CLOSING, true);
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    fn attributes(&self) -> &AttributeStore {
        self.inner.attributes()
    }

    fn send(&self, data: Bytes) {
        self.send_frame(text_frame(&data));
    }

    fn close(&self) {
        self.close_with(CloseCode::Normal);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wampkit_core::testing::MockConnection;

    #[test]
    fn sends_text_frames() {
        let mock = Arc::new(MockConnection::new());
        let connection = WebSocketConnection::new(mock.clone());

        connection.send(Bytes::from_static(b"[0]"));
        assert_eq!(mock.sent(), vec![encode(text_frame(b"[0]"))]);
        assert_eq!(connection.id(), mock.id());
    }

    #[test]
    fn close_sends_one_close_frame_and_blocks_sends() {
        let mock = Arc::new(MockConnection::new());
        let connection = WebSocketConnection::new(mock.clone());

        connection.close();
        connection.close();
        connection.send(Bytes::from_static(b"late"));

        assert_eq!(mock.sent(), vec![encode(close_frame(CloseCode::Normal))]);
        assert_eq!(mock.close_count(), 1);
        assert!(connection.is_closing());
    }
}
