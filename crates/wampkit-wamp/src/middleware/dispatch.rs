use super::WampServerMiddleware;
use crate::connection::WampConnectionRef;
use crate::error_uri::{DefaultErrorUriResolver, ErrorUriResolver, NOT_FOUND};
use crate::handler::{MessageHandler, MessageHandlerResolver, RpcHandler, TopicHandler};
use crate::request::WampMessageRequest;
use crate::router::Router;
use crate::topic::Topic;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use wampkit_core::{ConnectionRef, Error, Result, ServerMiddleware};

/// Connection lifecycle event seen by the innermost stage
#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent<'a> {
    Opened,
    Closed,
    Error(&'a Error),
}

/// Callback observing [`LifecycleEvent`]s
pub type LifecycleListener = Arc<dyn Fn(&ConnectionRef, LifecycleEvent<'_>) + Send + Sync>;

/// Innermost stage: routes WAMP actions to application handlers
///
/// A URI that does not route, or whose handler cannot be resolved, is
/// answered on the wire (CALLERROR for CALL, an error EVENT otherwise) and the
/// error is still returned so outer stages can undo their bookkeeping.
pub struct DispatchMessageToHandler {
    router: Arc<dyn Router>,
    resolver: Arc<dyn MessageHandlerResolver>,
    error_uris: Arc<dyn ErrorUriResolver>,
    listener: Option<LifecycleListener>,
}

impl DispatchMessageToHandler {
    pub fn new(router: Arc<dyn Router>, resolver: Arc<dyn MessageHandlerResolver>) -> Self {
        Self {
            router,
            resolver,
            error_uris: Arc::new(DefaultErrorUriResolver),
            listener: None,
        }
    }

    /// Call `listener` when a connection opens, closes or fails
    pub fn with_lifecycle_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ConnectionRef, LifecycleEvent<'_>) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    fn notify(&self, connection: &ConnectionRef, event: LifecycleEvent<'_>) {
        if let Some(listener) = &self.listener {
            listener(connection, event);
        }
    }

    /// Use `error_uris` for the URIs of error replies
    pub fn with_error_uri_resolver(mut self, error_uris: Arc<dyn ErrorUriResolver>) -> Self {
        self.error_uris = error_uris;
        self
    }

    fn not_found_message(uri: &str) -> String {
        Error::route_not_found(uri).to_string()
    }

    /// Route `uri` and resolve its handler, calling `reply` before any failure
    /// is returned
    fn resolve<F>(&self, uri: &str, reply: F) -> Result<(WampMessageRequest, MessageHandler)>
    where
        F: FnOnce() -> Result<()>,
    {
        let resolved = self.router.match_uri(uri).and_then(|matched| {
            let request = WampMessageRequest::new(uri, matched);
            let handler = self.resolver.find_message_handler(&request)?;
            Ok((request, handler))
        });

        match resolved {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                tracing::debug!(uri = %uri, error = %err, "No message handler");
                reply()?;
                Err(err)
            }
        }
    }

    fn call_not_found(&self, connection: &WampConnectionRef, call_id: &str, uri: &str) -> Result<()> {
        connection.call_error(
            call_id,
            &self.error_uris.resolve(NOT_FOUND),
            &Self::not_found_message(uri),
            Some(&json!({
                "code": 404,
                "uri": uri,
            })),
        )
    }

    fn event_not_found(connection: &WampConnectionRef, uri: &str) -> Result<()> {
        connection.event(
            uri,
            &json!({
                "error": true,
                "message": Self::not_found_message(uri),
                "code": 404,
                "uri": uri,
            }),
        )
    }

    fn topic_handler(
        &self,
        kind: &str,
        topic: &Topic,
        connection: &WampConnectionRef,
    ) -> Result<(WampMessageRequest, Arc<dyn TopicHandler>)> {
        let (request, handler) =
            self.resolve(topic.id(), || Self::event_not_found(connection, topic.id()))?;
        let handler = handler.as_topic().cloned().ok_or_else(|| {
            Error::invalid_message_handler(format!(
                "the handler \"{}\" for a {kind} message must be a topic handler",
                request.handler_id()
            ))
        })?;
        Ok((request, handler))
    }
}

impl ServerMiddleware for DispatchMessageToHandler {
    fn on_open(&mut self, connection: &ConnectionRef) -> Result<()> {
        tracing::info!(connection_id = %connection.id(), "Connection opened");
        self.notify(connection, LifecycleEvent::Opened);
        Ok(())
    }

    fn on_message(&mut self, _connection: &ConnectionRef, _data: Bytes) -> Result<()> {
        Ok(())
    }

    fn on_close(&mut self, connection: &ConnectionRef) -> Result<()> {
        tracing::info!(connection_id = %connection.id(), "Connection closed");
        self.notify(connection, LifecycleEvent::Closed);
        Ok(())
    }

    fn on_error(&mut self, connection: &ConnectionRef, error: &Error) -> Result<()> {
        tracing::warn!(
            connection_id = %connection.id(),
            error = %error,
            kind = ?error.kind(),
            "Connection error"
        );
        self.notify(connection, LifecycleEvent::Error(error));
        Ok(())
    }
}

impl WampServerMiddleware for DispatchMessageToHandler {
    fn on_call(
        &mut self,
        connection: &WampConnectionRef,
        call_id: &str,
        topic: &Arc<Topic>,
        params: Vec<Value>,
    ) -> Result<()> {
        let uri = topic.id();
        let (request, handler) =
            self.resolve(uri, || self.call_not_found(connection, call_id, uri))?;

        let handler: &Arc<dyn RpcHandler> = handler.as_rpc().ok_or_else(|| {
            Error::invalid_message_handler(format!(
                "the handler \"{}\" for a CALL message must be an RPC handler",
                request.handler_id()
            ))
        })?;

        tracing::debug!(uri = %uri, call_id = %call_id, "Dispatching CALL");
        handler.on_call(connection, call_id, &request, &params)
    }

    fn on_subscribe(&mut self, connection: &WampConnectionRef, topic: &Arc<Topic>) -> Result<()> {
        let (request, handler) = self.topic_handler("SUBSCRIBE", topic, connection)?;
        tracing::debug!(uri = %topic.id(), "Dispatching SUBSCRIBE");
        handler.on_subscribe(connection, topic, &request)
    }

    fn on_unsubscribe(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
    ) -> Result<()> {
        let (request, handler) = self.topic_handler("UNSUBSCRIBE", topic, connection)?;
        tracing::debug!(uri = %topic.id(), "Dispatching UNSUBSCRIBE");
        handler.on_unsubscribe(connection, topic, &request)
    }

    fn on_publish(
        &mut self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    ) -> Result<()> {
        let (request, handler) = self.topic_handler("PUBLISH", topic, connection)?;
        tracing::debug!(uri = %topic.id(), "Dispatching PUBLISH");
        handler.on_publish(connection, topic, &request, &event, &exclude, &eligible)
    }
}
