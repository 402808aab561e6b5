//! WAMP-aware pipeline stages
//!
//! [`ParseWampMessage`] sits at the boundary: it is an ordinary
//! [`ServerMiddleware`] towards the WebSocket stage and drives a
//! [`WampServerMiddleware`] with decoded actions. The default inner chain is
//! [`UpdateTopicSubscriptions`] wrapping [`DispatchMessageToHandler`].

mod dispatch;
mod parse;
mod subscriptions;

pub use dispatch::{DispatchMessageToHandler, LifecycleEvent, LifecycleListener};
pub use parse::{ParseWampMessage, DEFAULT_SERVER_IDENTITY};
pub use subscriptions::{UpdateTopicSubscriptions, WAMP_SUBSCRIPTIONS};

use crate::connection::WampConnectionRef;
use crate::topic::Topic;
use serde_json::Value;
use std::sync::Arc;
use wampkit_core::{Result, ServerMiddleware};

/// A stage that receives decoded WAMP actions
///
/// Lifecycle events arrive through the [`ServerMiddleware`] methods with the
/// connection already decorated as a [`WampConnection`].
///
/// [`WampConnection`]: crate::WampConnection
pub trait WampServerMiddleware: ServerMiddleware {
    /// CALL to the procedure identified by `topic`
    fn on_call(
        &mut self,
        connection: &WampConnectionRef,
        call_id: &str,
        topic: &Arc<Topic>,
        params: Vec<Value>,
    ) -> Result<()>;

    /// SUBSCRIBE to `topic`
    fn on_subscribe(&mut self, connection: &WampConnectionRef, topic: &Arc<Topic>) -> Result<()>;

    /// UNSUBSCRIBE from `topic`
    fn on_unsubscribe(&mut self, connection: &WampConnectionRef, topic: &Arc<Topic>)
        -> Result<()>;

    /// PUBLISH `event` to `topic`
    fn on_publish(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    ) -> Result<()>;
}

/// A boxed WAMP stage
pub type BoxedWampMiddleware = Box<dyn WampServerMiddleware>;

impl<M> WampServerMiddleware for Box<M>
where
    M: WampServerMiddleware + ?Sized,
{
    fn on_call(
        &mut self,
        connection: &WampConnectionRef,
        call_id: &str,
        topic: &Arc<Topic>,
        params: Vec<Value>,
    ) -> Result<()> {
        (**self).on_call(connection, call_id, topic, params)
    }

    fn on_subscribe(&mut self, connection: &WampConnectionRef, topic: &Arc<Topic>) -> Result<()> {
        (**self).on_subscribe(connection, topic)
    }

    fn on_unsubscribe(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
    ) -> Result<()> {
        (**self).on_unsubscribe(connection, topic)
    }

    fn on_publish(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    ) -> Result<()> {
        (**self).on_publish(connection, topic, event, exclude, eligible)
    }
}
