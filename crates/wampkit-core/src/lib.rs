//! # wampkit Core
//!
//! Core library providing the connection model, the middleware pipeline, the
//! HTTP request stages and the tokio transport for wampkit.
//!
//! This crate is not meant to be used directly. Use `wampkit` instead.

pub mod attributes;
pub mod config;
pub mod connection;
mod error;
pub mod http;
pub mod middleware;
pub mod server;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Public API
pub use attributes::{AttributeStore, AttributeValue};
pub use config::{load_dotenv, ServerConfig};
pub use connection::{downcast_connection, Connection, ConnectionId, ConnectionRef, Outbound, SocketConnection};
pub use error::{Error, ErrorKind, Result};
pub use middleware::{BoxedMiddleware, MiddlewareLayer, MiddlewareStack, ServerMiddleware};
pub use server::{dispatch_event, Server, ServerEvent};
