//! Broker configuration.
//!
//! DESIGN
//! ======
//! Settings come from `SWITCHBOARD_*` environment variables with defaults,
//! are validated once, and the resulting value is passed explicitly into
//! the dispatcher and listeners. Unlike a best-effort env parse, a value
//! that is present but unparsable is an error: a broker started with a
//! silently defaulted token or port is worse than one that refuses to start.

use std::net::{IpAddr, Ipv4Addr};

use frames::{WireConfig, WireConfigError, parse_delimiter_hex};

pub const DEFAULT_TCP_PORT: u16 = 7420;
pub const DEFAULT_MAX_PROCESSES: usize = 256;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid wire settings: {0}")]
    Wire(#[from] WireConfigError),
    #[error("no listener enabled; set SWITCHBOARD_TCP_PORT or SWITCHBOARD_WS_PORT")]
    NoListener,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Shared secret every process presents when registering.
    pub token: String,
    pub bind_addr: IpAddr,
    /// Raw delimiter-framed TCP listener. `None` disables it.
    pub tcp_port: Option<u16>,
    /// WebSocket listener (`GET /ws`). `None` disables it.
    pub ws_port: Option<u16>,
    pub max_processes: usize,
    /// Frames queued per connection before it is treated as faulted.
    pub outbound_capacity: usize,
    pub wire: WireConfig,
}

impl BrokerConfig {
    /// Defaults with the given token: TCP on 7420, WebSocket off.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: Some(DEFAULT_TCP_PORT),
            ws_port: None,
            max_processes: DEFAULT_MAX_PROCESSES,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            wire: WireConfig::default(),
        }
    }

    /// Read and validate settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing, unparsable, or invalid settings.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from any key lookup. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing or unparsable settings.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let token = get("SWITCHBOARD_TOKEN").ok_or(ConfigError::Missing("SWITCHBOARD_TOKEN"))?;
        let mut config = Self::new(token);

        if let Some(value) = get("SWITCHBOARD_BIND") {
            config.bind_addr = parse("SWITCHBOARD_BIND", &value)?;
        }
        if let Some(value) = get("SWITCHBOARD_TCP_PORT") {
            config.tcp_port = parse_port("SWITCHBOARD_TCP_PORT", &value)?;
        }
        if let Some(value) = get("SWITCHBOARD_WS_PORT") {
            config.ws_port = parse_port("SWITCHBOARD_WS_PORT", &value)?;
        }
        if let Some(value) = get("SWITCHBOARD_MAX_PROCESSES") {
            config.max_processes = parse("SWITCHBOARD_MAX_PROCESSES", &value)?;
        }
        if let Some(value) = get("SWITCHBOARD_OUTBOUND_CAPACITY") {
            config.outbound_capacity = parse("SWITCHBOARD_OUTBOUND_CAPACITY", &value)?;
        }
        if let Some(value) = get("SWITCHBOARD_DELIMITER_HEX") {
            config.wire.delimiter = parse_delimiter_hex(&value)?;
        }
        if let Some(value) = get("SWITCHBOARD_ENCODING") {
            config.wire.encoding = value.parse().map_err(WireConfigError::UnknownEncoding)?;
        }
        if let Some(value) = get("SWITCHBOARD_COMPRESSION_THRESHOLD") {
            config.wire.compression_threshold = parse("SWITCHBOARD_COMPRESSION_THRESHOLD", &value)?;
        }
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_empty() {
            return Err(ConfigError::Missing("SWITCHBOARD_TOKEN"));
        }
        if self.tcp_port.is_none() && self.ws_port.is_none() {
            return Err(ConfigError::NoListener);
        }
        if self.max_processes == 0 {
            return Err(ConfigError::Zero("SWITCHBOARD_MAX_PROCESSES"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("SWITCHBOARD_OUTBOUND_CAPACITY"));
        }
        self.wire.validate()?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value: value.to_owned() })
}

/// `off` disables a listener.
fn parse_port(key: &'static str, value: &str) -> Result<Option<u16>, ConfigError> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    parse(key, value).map(Some)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
