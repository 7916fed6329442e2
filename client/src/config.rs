use std::net::SocketAddr;
use std::time::Duration;

use frames::{BROKER_NAME, WireConfig, WireConfigError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Where the broker listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Raw delimiter-framed TCP.
    Tcp(SocketAddr),
    /// WebSocket URL, e.g. `ws://127.0.0.1:7421/ws`.
    Ws(String),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientConfigError {
    #[error("process name must not be empty")]
    EmptyName,
    #[error("process name {0:?} is reserved")]
    ReservedName(String),
    #[error("token must not be empty")]
    EmptyToken,
    #[error("websocket endpoint must start with ws:// or wss://: {0}")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Wire(#[from] WireConfigError),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Name to register under.
    pub name: String,
    pub token: String,
    pub endpoint: Endpoint,
    pub wire: WireConfig,
    /// How long a correlated request waits for its response.
    pub request_timeout: Duration,
    /// Bound on dialing plus registration confirmation.
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, token: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            endpoint,
            wire: WireConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_wire(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }

    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ClientConfigError> {
        if self.name.trim().is_empty() {
            return Err(ClientConfigError::EmptyName);
        }
        if self.name == BROKER_NAME {
            return Err(ClientConfigError::ReservedName(self.name.clone()));
        }
        if self.token.is_empty() {
            return Err(ClientConfigError::EmptyToken);
        }
        if let Endpoint::Ws(url) = &self.endpoint {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ClientConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ClientConfigError::Zero("request_timeout"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClientConfigError::Zero("connect_timeout"));
        }
        if self.outbound_capacity == 0 {
            return Err(ClientConfigError::Zero("outbound_capacity"));
        }
        self.wire.validate()?;
        Ok(())
    }
}
