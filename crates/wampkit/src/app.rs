//! WampServer application builder

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wampkit_core::http::{
    HttpRequestParser, ParseHttpRequest, RejectBlockedIpAddress, RestrictToAllowedOrigins,
};
use wampkit_core::{
    BoxedMiddleware, ConnectionRef, Error, MiddlewareLayer, MiddlewareStack, Result, Server,
    ServerConfig,
};
use wampkit_wamp::error_uri::{DefaultErrorUriResolver, ErrorUriResolver};
use wampkit_wamp::{
    DispatchMessageToHandler, LifecycleEvent, LifecycleListener, MatchitRouter, MessageHandler,
    MessageHandlerResolver, ParseWampMessage, RpcHandler, StaticHandlerResolver, TopicHandler,
    TopicRegistry, UpdateTopicSubscriptions,
};
use wampkit_ws::EstablishWebSocketConnection;

/// Install the default `tracing` subscriber unless one is already set
///
/// Honors `RUST_LOG`, falling back to `info,wampkit=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wampkit=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

enum Handlers {
    Static(StaticHandlerResolver),
    Custom(Arc<dyn MessageHandlerResolver>),
}

/// Main application builder for wampkit
///
/// Assembles the default pipeline, outermost first:
///
/// ```text
/// RejectBlockedIpAddress → ParseHttpRequest → RestrictToAllowedOrigins
///   → EstablishWebSocketConnection → ParseWampMessage
///   → UpdateTopicSubscriptions → DispatchMessageToHandler
/// ```
///
/// # Example
///
/// ```rust,ignore
/// use wampkit::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     WampServer::new()
///         .rpc("http://example.com/calc#add", rpc_fn(|connection, call_id, _request, params| {
///             let sum: i64 = params.iter().filter_map(|p| p.as_i64()).sum();
///             connection.call_result(call_id, Some(&sum))
///         }))
///         .run()
///         .await
/// }
/// ```
pub struct WampServer {
    config: ServerConfig,
    router: MatchitRouter,
    handlers: Handlers,
    error_uris: Arc<dyn ErrorUriResolver>,
    registry: Arc<TopicRegistry>,
    layers: MiddlewareStack,
    listener: Option<LifecycleListener>,
    errors: Vec<Error>,
}

impl WampServer {
    /// Create a server with the default configuration
    pub fn new() -> Self {
        init_tracing();

        Self {
            config: ServerConfig::default(),
            router: MatchitRouter::new(),
            handlers: Handlers::Static(StaticHandlerResolver::new()),
            error_uris: Arc::new(DefaultErrorUriResolver),
            registry: Arc::new(TopicRegistry::new()),
            layers: MiddlewareStack::new(),
            listener: None,
            errors: Vec::new(),
        }
    }

    /// Create a server configured from `WAMPKIT_*` environment variables
    /// and `.env`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new().config(ServerConfig::from_env()?))
    }

    /// Replace the configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// The current configuration
    pub fn server_config(&self) -> &ServerConfig {
        &self.config
    }

    /// The topic registry shared by every connection
    ///
    /// Clone it before `run` to publish from outside a handler.
    pub fn topic_registry(&self) -> Arc<TopicRegistry> {
        self.registry.clone()
    }

    /// Serve CALLs to `pattern` with `handler`
    pub fn rpc<H>(self, pattern: &str, handler: H) -> Self
    where
        H: RpcHandler + 'static,
    {
        self.handler(pattern, MessageHandler::rpc(handler))
    }

    /// Serve SUBSCRIBE, UNSUBSCRIBE and PUBLISH for `pattern` with `handler`
    pub fn topic<H>(self, pattern: &str, handler: H) -> Self
    where
        H: TopicHandler + 'static,
    {
        self.handler(pattern, MessageHandler::topic(handler))
    }

    /// Serve `pattern` with `handler`, using the pattern as the handler id
    ///
    /// Registration errors are reported by [`into_stack`](Self::into_stack).
    pub fn handler(mut self, pattern: &str, handler: MessageHandler) -> Self {
        let Handlers::Static(resolver) = &mut self.handlers else {
            self.errors.push(Error::config(format!(
                "cannot register a handler for \"{pattern}\" after installing a custom resolver"
            )));
            return self;
        };
        resolver.register(pattern, handler);
        self.route(pattern, pattern)
    }

    /// Route `pattern` to `handler_id`, resolved by the installed resolver
    pub fn route(mut self, pattern: &str, handler_id: &str) -> Self {
        if let Err(err) = self.router.insert(pattern, handler_id) {
            self.errors.push(err);
        }
        self
    }

    /// Resolve handler ids with `resolver` instead of the built-in table
    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: MessageHandlerResolver + 'static,
    {
        self.handlers = Handlers::Custom(Arc::new(resolver));
        self
    }

    /// Use `resolver` for the URIs of error replies
    pub fn error_uri_resolver<R>(mut self, resolver: R) -> Self
    where
        R: ErrorUriResolver + 'static,
    {
        self.error_uris = Arc::new(resolver);
        self
    }

    /// Observe connections opening, closing and failing
    pub fn on_lifecycle<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ConnectionRef, LifecycleEvent<'_>) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Add a stage outside the default pipeline
    ///
    /// Layers see events in the order they are added, before the built-in
    /// stages.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: MiddlewareLayer + 'static,
    {
        self.layers.push(layer);
        self
    }

    /// Assemble the pipeline and return its outermost stage
    pub fn into_stack(self) -> Result<BoxedMiddleware> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let config = self.config;
        let resolver: Arc<dyn MessageHandlerResolver> = match self.handlers {
            Handlers::Static(resolver) => Arc::new(resolver),
            Handlers::Custom(resolver) => resolver,
        };

        let mut dispatch = DispatchMessageToHandler::new(Arc::new(self.router), resolver)
            .with_error_uri_resolver(self.error_uris);
        if let Some(listener) = self.listener {
            dispatch = dispatch.with_lifecycle_listener(move |connection, event| {
                listener(connection, event)
            });
        }
        let subscriptions = UpdateTopicSubscriptions::new(dispatch, self.registry.clone());
        let mut wamp = ParseWampMessage::new(subscriptions, self.registry);
        if let Some(identity) = &config.server_identity {
            wamp = wamp.with_server_identity(identity.clone());
        }

        let mut websocket = EstablishWebSocketConnection::new(Box::new(wamp));
        websocket.set_strict_sub_protocol_check(config.strict_sub_protocols);
        if config.keep_alive_interval().is_some() {
            websocket = websocket.with_keep_alive();
        }

        let mut origins = RestrictToAllowedOrigins::new(Box::new(websocket));
        for origin in &config.allowed_origins {
            origins.allow_origin(origin.clone());
        }

        let http = ParseHttpRequest::with_parser(
            Box::new(origins),
            HttpRequestParser::new(config.max_request_size),
        );

        let mut blocked = RejectBlockedIpAddress::new(Box::new(http));
        for address in &config.blocked_addresses {
            blocked.block_address(address)?;
        }

        Ok(self.layers.build(Box::new(blocked)))
    }

    /// Bind the configured address
    pub async fn bind(self) -> Result<Server> {
        let config = self.config.clone();
        let stack = self.into_stack()?;
        Server::bind(&config, stack).await
    }

    /// Bind and serve until the listener fails
    pub async fn run(self) -> Result<()> {
        self.bind().await?.run().await
    }
}

impl Default for WampServer {
    fn default() -> Self {
        Self::new()
    }
}
