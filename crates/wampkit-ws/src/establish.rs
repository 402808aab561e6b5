use crate::connection::{WebSocketConnection, WEBSOCKET_CLOSING};
use crate::frame::{close_code, Incoming, MessageBuffer, DEFAULT_MAX_MESSAGE_SIZE};
use crate::handshake::Negotiator;
use bytes::Bytes;
use http::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::{CloseCode, Control, OpCode};
use tungstenite::protocol::frame::Frame;
use wampkit_core::http::{encode_response, http_request};
use wampkit_core::{
    BoxedMiddleware, Connection, ConnectionId, ConnectionRef, Error, Result, ServerMiddleware,
};

struct ConnectionContext {
    connection: Arc<WebSocketConnection>,
    buffer: MessageBuffer,
}

impl ConnectionContext {
    fn decorated(&self) -> ConnectionRef {
        self.connection.clone()
    }
}

#[derive(Default)]
struct KeepAlive {
    awaiting_pong: HashSet<ConnectionId>,
    payload: Bytes,
}

/// Stage upgrading HTTP connections to WebSocket connections
///
/// Inner stages receive a [`WebSocketConnection`] and whole text or binary
/// message payloads; control frames are handled here.
pub struct EstablishWebSocketConnection {
    next: BoxedMiddleware,
    negotiator: Negotiator,
    connections: HashMap<ConnectionId, ConnectionContext>,
    keep_alive: Option<KeepAlive>,
    max_message_size: usize,
}

impl EstablishWebSocketConnection {
    /// Wrap `next`, supporting the sub-protocols it advertises
    pub fn new(next: BoxedMiddleware) -> Self {
        let negotiator = Negotiator::new(next.sub_protocols());
        Self {
            next,
            negotiator,
            connections: HashMap::new(),
            keep_alive: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Refuse clients that only offer unsupported sub-protocols
    pub fn set_strict_sub_protocol_check(&mut self, strict: bool) {
        self.negotiator.set_strict_sub_protocol_check(strict);
    }

    /// Ping every connection on each tick, closing those that missed the previous ping
    pub fn with_keep_alive(mut self) -> Self {
        self.keep_alive = Some(KeepAlive::default());
        self
    }

    /// Limit reassembled messages to `size` bytes
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Number of upgraded connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn handle_control(&mut self, connection: &WebSocketConnection, frame: Frame) {
        let opcode = frame.header().opcode;
        match opcode {
            OpCode::Control(Control::Ping) => connection.send_frame(Frame::pong(frame.into_data())),
            OpCode::Control(Control::Pong) => {
                if let Some(keep_alive) = self.keep_alive.as_mut() {
                    if frame.payload()[..] == keep_alive.payload[..] {
                        keep_alive.awaiting_pong.remove(&connection.id());
                    }
                }
            }
            OpCode::Control(Control::Close) => {
                debug!(connection_id = %connection.id(), code = ?close_code(&frame), "Close frame received");
                connection.close();
            }
            _ => {}
        }
    }

    fn keep_alive_round(&mut self) {
        let Some(keep_alive) = self.keep_alive.as_mut() else {
            return;
        };

        for id in keep_alive.awaiting_pong.drain() {
            if let Some(context) = self.connections.get(&id) {
                info!(connection_id = %id, "Closing connection that did not answer ping");
                context.connection.close_with(CloseCode::Away);
            }
        }

        keep_alive.payload = Bytes::from(format!("{:016x}", rand::random::<u64>()));
        for (id, context) in &self.connections {
            if context.connection.is_closing() {
                continue;
            }
            context
                .connection
                .send_frame(Frame::ping(keep_alive.payload.to_vec()));
            keep_alive.awaiting_pong.insert(*id);
        }
    }
}

impl ServerMiddleware for EstablishWebSocketConnection {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        let request = http_request(connection.as_ref()).ok_or_else(|| {
            Error::missing_request(
                "The HTTP request must be parsed before establishing a WebSocket connection",
            )
        })?;

        connection.attributes().set(WEBSOCKET_CLOSING, false);

        let response = self.negotiator.handshake(&request);
        connection.send(encode_response(&response));

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            warn!(connection_id = %connection.id(), status = %response.status(), "WebSocket handshake refused");
            connection.close();
            return Ok(());
        }

        let upgraded = Arc::new(WebSocketConnection::new(connection.clone()));
        debug!(connection_id = %connection.id(), "WebSocket connection established");

        let context = ConnectionContext {
            connection: upgraded,
            buffer: MessageBuffer::new(self.max_message_size),
        };
        let decorated = context.decorated();
        self.connections.insert(connection.id(), context);

        self.next.on_open(&decorated)
    }

    fn on_message(&mut self, connection: &ConnectionRef, data: Bytes) -> Result<()> {
        if connection.attributes().get_or(WEBSOCKET_CLOSING, false) {
            return Ok(());
        }

        let Some(context) = self.connections.get_mut(&connection.id()) else {
            debug!(connection_id = %connection.id(), "Ignoring data for connection without handshake");
            return Ok(());
        };

        let upgraded = context.connection.clone();
        let incoming = match context.buffer.feed(&data) {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!(connection_id = %connection.id(), error = %err, "Closing connection after protocol violation");
                upgraded.close_with(CloseCode::Protocol);
                return Ok(());
            }
        };

        // Every message gets its own outcome; a failure is reported for that
        // message and the rest of the read is still delivered.
        let decorated: ConnectionRef = upgraded.clone();
        for item in incoming {
            match item {
                Incoming::Message(message) => {
                    if let Err(err) = self.next.on_message(&decorated, message.payload) {
                        debug!(connection_id = %connection.id(), error = %err, "Message failed");
                        self.next.on_error(&decorated, &err)?;
                    }
                }
                Incoming::Control(frame) => self.handle_control(&upgraded, frame),
            }
        }
        Ok(())
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        let Some(context) = self.connections.remove(&connection.id()) else {
            return Ok(());
        };
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.awaiting_pong.remove(&connection.id());
        }
        self.next.on_close(&context.decorated())
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        match self.connections.get(&connection.id()) {
            Some(context) => {
                let decorated = context.decorated();
                self.next.on_error(&decorated, error)
            }
            None => {
                connection.close();
                Ok(())
            }
        }
    }

    fn on_tick(&mut self) -> Result<()> {
        self.keep_alive_round();
        self.next.on_tick()
    }

    fn sub_protocols(&self) -> Vec<String> {
        self.next.sub_protocols()
    }
}
