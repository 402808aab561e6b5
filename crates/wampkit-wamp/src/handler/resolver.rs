use super::MessageHandler;
use crate::request::WampMessageRequest;
use std::collections::HashMap;
use std::fmt;
use wampkit_core::{Error, Result};

/// Boxed error returned by handler factories
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Constructs a handler on demand
pub type HandlerFactory = Box<dyn Fn() -> std::result::Result<MessageHandler, BoxError> + Send + Sync>;

/// Turns the handler id of a matched route into a handler
pub trait MessageHandlerResolver: Send + Sync {
    /// Find the handler for `request`
    fn find_message_handler(&self, request: &WampMessageRequest) -> Result<MessageHandler>;
}

fn require_handler_id(request: &WampMessageRequest) -> Result<&str> {
    match request.handler_id() {
        "" => Err(Error::invalid_request(format!(
            "route \"{}\" does not name a message handler",
            request.route()
        ))),
        id => Ok(id),
    }
}

/// Resolves handler ids against a table of shared handler instances
#[derive(Default, Clone)]
pub struct StaticHandlerResolver {
    handlers: HashMap<String, MessageHandler>,
}

impl StaticHandlerResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, builder style
    pub fn with(mut self, id: impl Into<String>, handler: MessageHandler) -> Self {
        self.register(id, handler);
        self
    }

    /// Register a handler, replacing any previous one with the same id
    pub fn register(&mut self, id: impl Into<String>, handler: MessageHandler) {
        self.handlers.insert(id.into(), handler);
    }

    /// Whether a handler is registered for `id`
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }
}

impl MessageHandlerResolver for StaticHandlerResolver {
    fn find_message_handler(&self, request: &WampMessageRequest) -> Result<MessageHandler> {
        let id = require_handler_id(request)?;
        self.handlers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownMessageHandler(id.to_string()))
    }
}

impl fmt::Debug for StaticHandlerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("StaticHandlerResolver")
            .field("handlers", &ids)
            .finish()
    }
}

/// Builds a fresh handler per resolution from registered factories
#[derive(Default)]
pub struct FactoryHandlerResolver {
    factories: HashMap<String, HandlerFactory>,
}

impl FactoryHandlerResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, builder style
    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<MessageHandler, BoxError> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    /// Register a factory, replacing any previous one with the same id
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> std::result::Result<MessageHandler, BoxError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }
}

impl MessageHandlerResolver for FactoryHandlerResolver {
    fn find_message_handler(&self, request: &WampMessageRequest) -> Result<MessageHandler> {
        let id = require_handler_id(request)?;
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::UnknownMessageHandler(id.to_string()))?;

        factory().map_err(|err| Error::CannotInstantiateMessageHandler {
            handler: id.to_string(),
            reason: err.to_string(),
        })
    }
}

impl fmt::Debug for FactoryHandlerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("FactoryHandlerResolver")
            .field("factories", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::rpc_fn;
    use crate::router::RouteMatch;

    fn request(handler_id: &str) -> WampMessageRequest {
        WampMessageRequest::new(
            "http://example.com/calc#add",
            RouteMatch {
                pattern: "http://example.com/calc#add".into(),
                handler_id: handler_id.into(),
                params: HashMap::new(),
            },
        )
    }

    fn noop() -> MessageHandler {
        MessageHandler::rpc(rpc_fn(|_, _, _, _| Ok(())))
    }

    #[test]
    fn static_resolver_finds_registered_handlers() {
        let resolver = StaticHandlerResolver::new().with("calc.add", noop());
        let handler = resolver.find_message_handler(&request("calc.add")).unwrap();
        assert!(handler.as_rpc().is_some());
        assert!(resolver.contains("calc.add"));
    }

    #[test]
    fn static_resolver_errors() {
        let resolver = StaticHandlerResolver::new();
        assert!(matches!(
            resolver.find_message_handler(&request("missing")),
            Err(Error::UnknownMessageHandler(id)) if id == "missing"
        ));
        assert!(matches!(
            resolver.find_message_handler(&request("")),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn factory_resolver_builds_per_request() {
        let resolver = FactoryHandlerResolver::new()
            .with("calc.add", || Ok(noop()))
            .with("broken", || Err("database unavailable".into()));

        assert!(resolver
            .find_message_handler(&request("calc.add"))
            .unwrap()
            .as_rpc()
            .is_some());

        match resolver.find_message_handler(&request("broken")) {
            Err(Error::CannotInstantiateMessageHandler { handler, reason }) => {
                assert_eq!(handler, "broken");
                assert_eq!(reason, "database unavailable");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            resolver.find_message_handler(&request("nope")),
            Err(Error::UnknownMessageHandler(_))
        ));
    }
}
