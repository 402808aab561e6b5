//! # wampkit
//!
//! A middleware-based WAMP v1 server for tokio.
//!
//! Connections travel through a pipeline of stages that turn a raw TCP byte
//! stream into an HTTP request, upgrade it to a WebSocket and decode WAMP
//! messages, which are finally routed by URI to application handlers. Clients
//! get RPC (CALL) and publish/subscribe (SUBSCRIBE, PUBLISH, EVENT).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wampkit::prelude::*;
//!
//! struct Chat;
//!
//! impl TopicHandler for Chat {
//!     fn on_subscribe(&self, _: &WampConnectionRef, _: &Arc<Topic>, _: &WampMessageRequest) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn on_unsubscribe(&self, _: &WampConnectionRef, _: &Arc<Topic>, _: &WampMessageRequest) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn on_publish(
//!         &self,
//!         _: &WampConnectionRef,
//!         topic: &Arc<Topic>,
//!         _: &WampMessageRequest,
//!         event: &Value,
//!         exclude: &[String],
//!         eligible: &[String],
//!     ) -> Result<()> {
//!         topic.broadcast(event, exclude, eligible).map(|_| ())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     WampServer::from_env()?
//!         .topic("http://example.com/chat/{room}", Chat)
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! [`WampServer::from_env`] reads `WAMPKIT_*` variables (and `.env`); see
//! [`ServerConfig`] for the full list.
//!
//! ## Crates
//!
//! - `wampkit-core` - connections, the middleware traits, HTTP stages, transport
//! - `wampkit-ws` - WebSocket handshake, framing and keep-alive
//! - `wampkit-wamp` - WAMP decoding, topics, routing and handler dispatch

mod app;

pub use app::{init_tracing, WampServer};

// Re-export the building blocks
pub use wampkit_core::*;
pub use wampkit_wamp as wamp;
pub use wampkit_ws as ws;

pub use wampkit_wamp::{
    rpc_fn, DefaultErrorUriResolver, ErrorUriResolver, FactoryHandlerResolver, LifecycleEvent,
    MatchitRouter, MessageHandler, MessageHandlerResolver, RpcHandler, StaticHandlerResolver,
    Topic, TopicHandler, TopicRegistry, WampConnection, WampConnectionRef, WampMessageRequest,
};

/// Prelude module - import everything you need with `use wampkit::prelude::*`
pub mod prelude {
    pub use crate::app::WampServer;

    // Core types
    pub use wampkit_core::{
        Connection, ConnectionRef, Error, Result, ServerConfig, ServerMiddleware,
    };

    // WAMP types
    pub use wampkit_wamp::{
        rpc_fn, LifecycleEvent, MessageHandler, RpcHandler, Topic, TopicHandler, TopicRegistry,
        WampConnection, WampConnectionRef, WampMessageRequest,
    };

    // Re-export commonly used external types
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
    pub use tracing::{debug, error, info, trace, warn};
}
