//! Application message handlers
//!
//! An RPC handler answers CALL messages; a topic handler reacts to
//! SUBSCRIBE, UNSUBSCRIBE and PUBLISH. A [`MessageHandler`] carries either
//! capability or both, and the dispatcher checks the one the message kind
//! needs.
//!
//! Handlers are shared between connections and take `&self`; keep mutable
//! state behind a lock.

mod resolver;

pub use resolver::{
    BoxError, FactoryHandlerResolver, HandlerFactory, MessageHandlerResolver,
    StaticHandlerResolver,
};

use crate::connection::WampConnectionRef;
use crate::request::WampMessageRequest;
use crate::topic::Topic;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use wampkit_core::Result;

/// Handles CALL messages
pub trait RpcHandler: Send + Sync {
    /// A client called the procedure this handler is routed to
    ///
    /// The handler replies with [`WampConnection::call_result`] or
    /// [`WampConnection::call_error`].
    ///
    /// [`WampConnection::call_result`]: crate::WampConnection::call_result
    /// [`WampConnection::call_error`]: crate::WampConnection::call_error
    fn on_call(
        &self,
        connection: &WampConnectionRef,
        call_id: &str,
        request: &WampMessageRequest,
        params: &[Value],
    ) -> Result<()>;
}

/// Handles pub/sub messages
pub trait TopicHandler: Send + Sync {
    /// The connection joined `topic`
    fn on_subscribe(
        &self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        request: &WampMessageRequest,
    ) -> Result<()>;

    /// The connection left `topic`
    fn on_unsubscribe(
        &self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        request: &WampMessageRequest,
    ) -> Result<()>;

    /// The connection published `event` to `topic`
    ///
    /// Delivery is up to the handler, usually [`Topic::broadcast`] with the
    /// given filters.
    fn on_publish(
        &self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        request: &WampMessageRequest,
        event: &Value,
        exclude: &[String],
        eligible: &[String],
    ) -> Result<()>;
}

/// An RPC handler built from a closure, see [`rpc_fn`]
pub struct RpcFn<F> {
    f: F,
}

/// Wrap a closure as an [`RpcHandler`]
///
/// ```ignore
/// let echo = rpc_fn(|connection, call_id, _request, params| {
///     connection.call_result(call_id, Some(params))
/// });
/// ```
pub fn rpc_fn<F>(f: F) -> RpcFn<F>
where
    F: Fn(&WampConnectionRef, &str, &WampMessageRequest, &[Value]) -> Result<()> + Send + Sync,
{
    RpcFn { f }
}

impl<F> RpcHandler for RpcFn<F>
where
    F: Fn(&WampConnectionRef, &str, &WampMessageRequest, &[Value]) -> Result<()> + Send + Sync,
{
    fn on_call(
        &self,
        connection: &WampConnectionRef,
        call_id: &str,
        request: &WampMessageRequest,
        params: &[Value],
    ) -> Result<()> {
        (self.f)(connection, call_id, request, params)
    }
}

/// A resolved handler and the capabilities it offers
#[derive(Clone, Default)]
pub struct MessageHandler {
    rpc: Option<Arc<dyn RpcHandler>>,
    topic: Option<Arc<dyn TopicHandler>>,
}

impl MessageHandler {
    /// A handler that only answers CALL
    pub fn rpc<H: RpcHandler + 'static>(handler: H) -> Self {
        Self {
            rpc: Some(Arc::new(handler)),
            topic: None,
        }
    }

    /// A handler that only handles pub/sub
    pub fn topic<H: TopicHandler + 'static>(handler: H) -> Self {
        Self {
            rpc: None,
            topic: Some(Arc::new(handler)),
        }
    }

    /// A handler with both capabilities
    pub fn both<H: RpcHandler + TopicHandler + 'static>(handler: H) -> Self {
        let handler = Arc::new(handler);
        Self {
            rpc: Some(handler.clone()),
            topic: Some(handler),
        }
    }

    /// The RPC capability, if any
    pub fn as_rpc(&self) -> Option<&Arc<dyn RpcHandler>> {
        self.rpc.as_ref()
    }

    /// The pub/sub capability, if any
    pub fn as_topic(&self) -> Option<&Arc<dyn TopicHandler>> {
        self.topic.as_ref()
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("rpc", &self.rpc.is_some())
            .field("topic", &self.topic.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Both;

    impl RpcHandler for Both {
        fn on_call(
            &self,
            _connection: &WampConnectionRef,
            _call_id: &str,
            _request: &WampMessageRequest,
            _params: &[Value],
        ) -> Result<()> {
            Ok(())
        }
    }

    impl TopicHandler for Both {
        fn on_subscribe(
            &self,
            _connection: &WampConnectionRef,
            _topic: &Arc<Topic>,
            _request: &WampMessageRequest,
        ) -> Result<()> {
            Ok(())
        }

        fn on_unsubscribe(
            &self,
            _connection: &WampConnectionRef,
            _topic: &Arc<Topic>,
            _request: &WampMessageRequest,
        ) -> Result<()> {
            Ok(())
        }

        fn on_publish(
            &self,
            _connection: &WampConnectionRef,
            _topic: &Arc<Topic>,
            _request: &WampMessageRequest,
            _event: &Value,
            _exclude: &[String],
            _eligible: &[String],
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn capabilities() {
        let rpc = MessageHandler::rpc(rpc_fn(|_, _, _, _| Ok(())));
        assert!(rpc.as_rpc().is_some());
        assert!(rpc.as_topic().is_none());

        let topic = MessageHandler::topic(Both);
        assert!(topic.as_rpc().is_none());
        assert!(topic.as_topic().is_some());

        let both = MessageHandler::both(Both);
        assert!(both.as_rpc().is_some());
        assert!(both.as_topic().is_some());
    }
}
