//! Shared message model, wire codec, and stream framer for the broker.
//!
//! This crate owns the wire representation used by both `broker` and
//! `broker-client`. A connection carries `<encoded-message><delimiter>`
//! repeated; the encoding is JSON while debugging and base64-armoured
//! protobuf otherwise, so the delimiter can never occur inside a body.

mod codec;
mod compression;
mod config;
mod factory;
mod framer;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use codec::{Codec, Encoding};
pub use compression::{compress, decompress};
pub use config::{DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_DELIMITER, WireConfig, WireConfigError, parse_delimiter_hex};
pub use factory::{MessageFactory, default_error_text};
pub use framer::{Framer, MAX_BUFFERED_BYTES};

// =============================================================================
// RESERVED NAMES
// =============================================================================

/// Control identifier: register a process name with the broker.
pub const PROCESS_REGISTER: &str = "process-register";

/// Control identifier: unregister a process name.
pub const PROCESS_TERMINATE: &str = "process-terminate";

/// Control identifier: ask the broker for the current process listing.
pub const REQUEST_PROCESSES_INFO: &str = "request-processes-info";

/// Participant name the broker uses for messages it originates.
/// Never registrable and never listed.
pub const BROKER_NAME: &str = "BROKER";

/// Sentinel id carried by control messages.
pub const NO_ID: i64 = -1;

/// Origin stamped on messages synthesized from undecodable frames.
pub const UNKNOWN_ORIGIN: &str = "UNKNOWN_ORIGIN";

/// Target stamped on messages synthesized from undecodable frames.
pub const UNKNOWN_TARGET: &str = "UNKNOWN_TARGET";

/// Identifier stamped on messages synthesized from undecodable frames.
pub const UNKNOWN_IDENTIFIER: &str = "UNKNOWN";

/// True for identifiers the broker handles itself and never forwards.
#[must_use]
pub fn is_control_identifier(identifier: &str) -> bool {
    matches!(identifier, PROCESS_REGISTER | PROCESS_TERMINATE | REQUEST_PROCESSES_INFO)
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by encoding, decoding, and payload access.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    /// The bytes could not be decoded as a protobuf `WireMessage`.
    #[error("failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The base64 armour around a binary body is invalid.
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The `type` integer on the wire does not map to a [`MessageType`].
    #[error("invalid message type: {0}")]
    InvalidType(i32),
    /// The `status` integer on the wire does not map to a [`MessageStatus`].
    #[error("invalid message status: {0}")]
    InvalidStatus(i32),
    /// Deflate compression or decompression failed.
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
    /// A decompressed payload was not UTF-8.
    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

// =============================================================================
// ENUMS
// =============================================================================

/// Role of a message in a request/response exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageType {
    #[default]
    Unknown,
    Request,
    Response,
}

impl MessageType {
    /// Convert into the wire integer.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Request => 1,
            Self::Response => 2,
        }
    }

    /// Parse from the wire integer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidType`] for out-of-range values.
    pub fn from_i32(value: i32) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            other => Err(CodecError::InvalidType(other)),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(value: MessageType) -> Self {
        value.as_i32()
    }
}

impl TryFrom<i32> for MessageType {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value)
    }
}

/// Delivery outcome carried by a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageStatus {
    #[default]
    Unknown,
    Success,
    ServerError,
    TargetError,
    NetworkError,
    MalformedMessageError,
    ProcessNotFound,
}

impl MessageStatus {
    /// Convert into the wire integer.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Success => 1,
            Self::ServerError => 2,
            Self::TargetError => 3,
            Self::NetworkError => 4,
            Self::MalformedMessageError => 5,
            Self::ProcessNotFound => 6,
        }
    }

    /// Parse from the wire integer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidStatus`] for out-of-range values.
    pub fn from_i32(value: i32) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Success),
            2 => Ok(Self::ServerError),
            3 => Ok(Self::TargetError),
            4 => Ok(Self::NetworkError),
            5 => Ok(Self::MalformedMessageError),
            6 => Ok(Self::ProcessNotFound),
            other => Err(CodecError::InvalidStatus(other)),
        }
    }

    /// Anything other than `Success` or `Unknown` signals a failure.
    #[must_use]
    pub fn is_exception(self) -> bool {
        !matches!(self, Self::Success | Self::Unknown)
    }
}

impl From<MessageStatus> for i32 {
    fn from(value: MessageStatus) -> Self {
        value.as_i32()
    }
}

impl TryFrom<i32> for MessageStatus {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value)
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A single message on the broker wire.
///
/// Either `data` holds the payload text, or `compressed` is set and the
/// deflated payload lives in `compressed_data` with `data` empty. Use
/// [`Message::payload`] to read the text regardless of which form arrived.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id for application messages, [`NO_ID`] for control messages.
    #[serde(default = "no_id")]
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub target: String,
    /// Request-type tag used for handler routing.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub compressed_data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub compressed: bool,
    /// Decompressed payload, filled on first read.
    #[serde(skip)]
    inflated: OnceLock<String>,
}

fn no_id() -> i64 {
    NO_ID
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: NO_ID,
            origin: String::new(),
            target: String::new(),
            identifier: String::new(),
            data: String::new(),
            compressed_data: Vec::new(),
            error: None,
            kind: MessageType::Unknown,
            status: MessageStatus::Unknown,
            compressed: false,
            inflated: OnceLock::new(),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.origin == other.origin
            && self.target == other.target
            && self.identifier == other.identifier
            && self.data == other.data
            && self.compressed_data == other.compressed_data
            && self.error == other.error
            && self.kind == other.kind
            && self.status == other.status
            && self.compressed == other.compressed
    }
}

impl Message {
    /// A bare message addressed from `origin` to `target`; remaining fields
    /// take their defaults and can be set directly.
    #[must_use]
    pub fn new(identifier: impl Into<String>, origin: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            origin: origin.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    /// True when `status` signals a failure.
    #[must_use]
    pub fn has_exception(&self) -> bool {
        self.status.is_exception()
    }

    /// True when `identifier` is reserved for broker control traffic.
    #[must_use]
    pub fn is_control(&self) -> bool {
        is_control_identifier(&self.identifier)
    }

    /// Payload text, decompressing on first access.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the compressed payload cannot be inflated.
    pub fn payload(&self) -> Result<&str, CodecError> {
        if !self.compressed {
            return Ok(self.data.as_str());
        }
        if let Some(text) = self.inflated.get() {
            return Ok(text.as_str());
        }
        let text = decompress(&self.compressed_data)?;
        Ok(self.inflated.get_or_init(|| text).as_str())
    }

    /// Owned payload text.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the compressed payload cannot be inflated.
    pub fn into_payload(self) -> Result<String, CodecError> {
        if !self.compressed {
            return Ok(self.data);
        }
        match self.inflated.into_inner() {
            Some(text) => Ok(text),
            None => decompress(&self.compressed_data),
        }
    }

    /// Promote `Unknown` to `Success`; other statuses are left alone.
    pub fn normalize_status(&mut self) {
        if self.status == MessageStatus::Unknown {
            self.status = MessageStatus::Success;
        }
    }
}

// =============================================================================
// CONTROL PAYLOADS
// =============================================================================

/// Outcome of a registration or termination, broadcast to registered peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessUpdateData {
    pub accepted: bool,
    pub name: String,
}

/// One entry in a process listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProcessData {
    pub name: String,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
