//! Error types for wampkit
//!
//! Every stage of the pipeline reports failures through the single [`Error`]
//! enum. [`Error::kind`] groups the variants into the broad categories the
//! server reacts to.

use thiserror::Error;

/// Result type alias for wampkit operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer sent something that violates HTTP, WebSocket or WAMP framing
    Protocol,
    /// No route matched the requested URI
    Routing,
    /// A matched route could not be turned into a usable handler
    HandlerResolution,
    /// A connection of the wrong decoration reached a component
    ConnectionType,
    /// Topic registry bookkeeping failed
    Registry,
    /// IO, configuration and startup failures
    Infrastructure,
}

/// Error type for wampkit operations
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP request could not be parsed
    #[error("Malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// The buffered HTTP request grew past the configured limit
    #[error("Maximum buffer size of {limit} exceeded parsing HTTP header")]
    MessageTooLarge { limit: usize },

    /// A stage expected the parsed HTTP request on the connection
    #[error("{0}")]
    MissingRequest(String),

    /// The WebSocket handshake could not be negotiated
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// A WebSocket frame violated RFC 6455
    #[error("Invalid WebSocket frame: {0}")]
    InvalidFrame(String),

    /// A WAMP payload was not a well formed message
    #[error("Invalid WAMP message: {0}")]
    InvalidMessage(String),

    /// The WAMP type code is not one a client may send
    #[error("Unsupported WAMP message type \"{0}\"")]
    UnsupportedMessageType(i64),

    /// No route matches the URI
    #[error("Could not find a message handler for URI \"{0}\".")]
    RouteNotFound(String),

    /// The route names a handler the resolver does not know
    #[error("Message handler \"{0}\" is not registered")]
    UnknownMessageHandler(String),

    /// The handler factory failed
    #[error("Cannot instantiate message handler \"{handler}\": {reason}")]
    CannotInstantiateMessageHandler { handler: String, reason: String },

    /// The handler lacks the capability the message kind requires
    #[error("Invalid message handler: {0}")]
    InvalidMessageHandler(String),

    /// The matched route carries no usable handler reference
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The connection is not decorated the way the component requires
    #[error("Unsupported connection: {0}")]
    UnsupportedConnection(String),

    /// A topic with the same URI is already in the registry
    #[error("A topic for URI \"{0}\" is already registered")]
    TopicAlreadyRegistered(String),

    /// No topic with the URI is in the registry
    #[error("No topic is registered for URI \"{0}\"")]
    TopicNotFound(String),

    /// A route pattern collides with one registered earlier
    #[error("Route conflict for \"{pattern}\": {details}")]
    RouteConflict { pattern: String, details: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a malformed request error
    pub fn malformed_request(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create a missing request error
    pub fn missing_request(msg: impl Into<String>) -> Self {
        Self::MissingRequest(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create an invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid WAMP message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create a route not found error
    pub fn route_not_found(uri: impl Into<String>) -> Self {
        Self::RouteNotFound(uri.into())
    }

    /// Create an invalid message handler error
    pub fn invalid_message_handler(msg: impl Into<String>) -> Self {
        Self::InvalidMessageHandler(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an unsupported connection error
    pub fn unsupported_connection(msg: impl Into<String>) -> Self {
        Self::UnsupportedConnection(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRequest(_)
            | Self::MessageTooLarge { .. }
            | Self::MissingRequest(_)
            | Self::Handshake(_)
            | Self::InvalidFrame(_)
            | Self::InvalidMessage(_)
            | Self::UnsupportedMessageType(_) => ErrorKind::Protocol,
            Self::RouteNotFound(_) => ErrorKind::Routing,
            Self::UnknownMessageHandler(_)
            | Self::CannotInstantiateMessageHandler { .. }
            | Self::InvalidMessageHandler(_)
            | Self::InvalidRequest(_) => ErrorKind::HandlerResolution,
            Self::UnsupportedConnection(_) => ErrorKind::ConnectionType,
            Self::TopicAlreadyRegistered(_) | Self::TopicNotFound(_) => ErrorKind::Registry,
            Self::RouteConflict { .. } | Self::Config(_) | Self::Io(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Whether this is a [`Error::RouteNotFound`]
    pub fn is_route_not_found(&self) -> bool {
        matches!(self, Self::RouteNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMessage(err.to_string())
    }
}

impl From<envy::Error> for Error {
    fn from(err: envy::Error) -> Self {
        Self::Config(err.to_string())
    }
}
