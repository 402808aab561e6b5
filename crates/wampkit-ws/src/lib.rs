//! # wampkit-ws
//!
//! WebSocket stage for wampkit.
//!
//! [`EstablishWebSocketConnection`] sits between the HTTP stages and the
//! WAMP stages. It answers the opening handshake, decodes RFC 6455 frames
//! with `tungstenite`'s frame types, answers pings and, when keep-alive is
//! enabled, pings clients on every server tick and closes those that stay
//! silent.
//!
//! ```ignore
//! use wampkit_core::http::ParseHttpRequest;
//! use wampkit_ws::EstablishWebSocketConnection;
//!
//! let websocket = EstablishWebSocketConnection::new(Box::new(app)).with_keep_alive();
//! let stack = ParseHttpRequest::new(Box::new(websocket));
//! ```

mod connection;
mod establish;
pub mod frame;
pub mod handshake;

pub use connection::{WebSocketConnection, WEBSOCKET_CLOSING};
pub use establish::EstablishWebSocketConnection;
pub use frame::{close_code, close_frame, decode_frame, encode, text_frame, MessageBuffer};
pub use tungstenite::protocol::frame::coding::{CloseCode, OpCode};
pub use tungstenite::protocol::frame::Frame;
pub use handshake::{generate_accept_key, Negotiator};
