//! # wampkit-wamp
//!
//! WAMP v1 on top of the wampkit pipeline: message decoding, the
//! [`WampConnection`] decoration, pub/sub [`Topic`]s and the stages that turn
//! decoded actions into handler calls.
//!
//! The stages nest in a fixed order:
//!
//! ```text
//! ParseWampMessage
//!   └─ UpdateTopicSubscriptions
//!        └─ DispatchMessageToHandler ── Router ── MessageHandlerResolver
//! ```
//!
//! `ParseWampMessage` is a plain [`ServerMiddleware`](wampkit_core::ServerMiddleware)
//! and goes inside the WebSocket stage.

pub mod connection;
pub mod error_uri;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod request;
pub mod router;
pub mod topic;

pub use connection::{generate_session_id, WampConnection, WampConnectionRef};
pub use error_uri::{DefaultErrorUriResolver, ErrorUriResolver};
pub use handler::{
    rpc_fn, FactoryHandlerResolver, MessageHandler, MessageHandlerResolver, RpcHandler,
    StaticHandlerResolver, TopicHandler,
};
pub use message::{MessageType, WampAction, PROTOCOL_VERSION};
pub use middleware::{
    BoxedWampMiddleware, DispatchMessageToHandler, LifecycleEvent, LifecycleListener,
    ParseWampMessage, UpdateTopicSubscriptions, WampServerMiddleware,
};
pub use request::WampMessageRequest;
pub use router::{MatchitRouter, RouteMatch, Router};
pub use topic::{Topic, TopicRegistry};
