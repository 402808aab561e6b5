//! Server configuration with environment variable support.
//!
//! Settings are read from `WAMPKIT_`-prefixed environment variables, after
//! loading a `.env` file if one exists. Every field has a default, so an empty
//! environment yields a usable configuration.
//!
//! | variable | field |
//! |----------|-------|
//! | `WAMPKIT_HOST` | `host` |
//! | `WAMPKIT_PORT` | `port` |
//! | `WAMPKIT_MAX_REQUEST_SIZE` | `max_request_size` |
//! | `WAMPKIT_KEEP_ALIVE_INTERVAL_SECS` | `keep_alive_interval_secs` (0 disables) |
//! | `WAMPKIT_SERVER_IDENTITY` | `server_identity` |
//! | `WAMPKIT_ALLOWED_ORIGINS` | `allowed_origins` (comma separated) |
//! | `WAMPKIT_BLOCKED_ADDRESSES` | `blocked_addresses` (comma separated) |
//! | `WAMPKIT_STRICT_SUB_PROTOCOLS` | `strict_sub_protocols` |

use crate::error::Result;
use crate::http::DEFAULT_MAX_REQUEST_SIZE;
use serde::Deserialize;
use std::time::Duration;

/// Prefix of every configuration variable
pub const ENV_PREFIX: &str = "WAMPKIT_";

/// Load environment variables from a `.env` file, if present.
///
/// Variables that are already set are not overridden.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Settings for a wampkit server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind, 0 picks a free port
    pub port: u16,
    /// Upper bound on the opening HTTP request, in bytes
    pub max_request_size: usize,
    /// Seconds between keep-alive pings, 0 disables keep-alive
    pub keep_alive_interval_secs: u64,
    /// Identity announced in WELCOME messages
    pub server_identity: Option<String>,
    /// Origin hosts allowed to connect; empty allows all
    pub allowed_origins: Vec<String>,
    /// Addresses or CIDR ranges refused on connect
    pub blocked_addresses: Vec<String>,
    /// Reject clients offering only unsupported sub-protocols
    pub strict_sub_protocols: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            keep_alive_interval_secs: 0,
            server_identity: None,
            allowed_origins: Vec::new(),
            blocked_addresses: Vec::new(),
            strict_sub_protocols: true,
        }
    }
}

impl ServerConfig {
    /// Load `.env` and read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Read the configuration from `(name, value)` pairs
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?)
    }

    /// The address to bind, as `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The keep-alive interval, if enabled
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keep_alive_interval_secs))
    }

    /// Set the interface to bind
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port to bind
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the request size limit
    pub fn max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    /// Set the keep-alive interval, `Duration::ZERO` disables it
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_secs = interval.as_secs();
        self
    }

    /// Set the identity announced in WELCOME messages
    pub fn server_identity(mut self, identity: impl Into<String>) -> Self {
        self.server_identity = Some(identity.into());
        self
    }

    /// Allow an origin host
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Block an address or CIDR range
    pub fn block_address(mut self, address: impl Into<String>) -> Self {
        self.blocked_addresses.push(address.into());
        self
    }

    /// Toggle strict sub-protocol checking
    pub fn strict_sub_protocols(mut self, strict: bool) -> Self {
        self.strict_sub_protocols = strict;
        self
    }
}
