//! Message ⇄ bytes.
//!
//! Two encodings share one message model:
//! - `Json`: readable, for development and packet captures.
//! - `Binary`: protobuf, base64-armoured so the body stays within the
//!   printable ASCII range and can never contain a control-byte delimiter.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use prost::Message as _;

use crate::{CodecError, DEFAULT_DELIMITER, Message, MessageStatus, MessageType};

/// Body encoding used on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    Json,
    #[default]
    Binary,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" | "protobuf" => Ok(Self::Binary),
            other => Err(other.to_owned()),
        }
    }
}

/// Encoder/decoder for one connection's wire settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Codec {
    encoding: Encoding,
    delimiter: Vec<u8>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Encoding::default(), DEFAULT_DELIMITER)
    }
}

impl Codec {
    #[must_use]
    pub fn new(encoding: Encoding, delimiter: impl Into<Vec<u8>>) -> Self {
        Self { encoding, delimiter: delimiter.into() }
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Encode a message body (no delimiter).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if JSON serialization fails.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        match self.encoding {
            Encoding::Json => Ok(serde_json::to_vec(message)?),
            Encoding::Binary => {
                let wire = message_to_wire(message);
                Ok(STANDARD.encode(wire.encode_to_vec()).into_bytes())
            }
        }
    }

    /// Encode a message and terminate it with the delimiter, ready for a
    /// transport write.
    ///
    /// # Errors
    ///
    /// Propagates [`Codec::encode`] failures.
    pub fn encode_frame(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let mut out = self.encode(message)?;
        out.extend_from_slice(&self.delimiter);
        Ok(out)
    }

    /// Decode a message body (delimiter already stripped).
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed bodies and out-of-range enum
    /// values.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let bytes = bytes.trim_ascii();
        match self.encoding {
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
            Encoding::Binary => {
                let raw = STANDARD.decode(bytes)?;
                wire_to_message(WireMessage::decode(raw.as_slice())?)
            }
        }
    }
}

fn message_to_wire(message: &Message) -> WireMessage {
    WireMessage {
        id: message.id,
        origin: message.origin.clone(),
        target: message.target.clone(),
        identifier: message.identifier.clone(),
        data: message.data.clone(),
        compressed_data: message.compressed_data.clone(),
        error: message.error.clone(),
        kind: message.kind.as_i32(),
        status: message.status.as_i32(),
        compressed: message.compressed,
    }
}

fn wire_to_message(wire: WireMessage) -> Result<Message, CodecError> {
    Ok(Message {
        id: wire.id,
        origin: wire.origin,
        target: wire.target,
        identifier: wire.identifier,
        data: wire.data,
        compressed_data: wire.compressed_data,
        error: wire.error,
        kind: MessageType::from_i32(wire.kind)?,
        status: MessageStatus::from_i32(wire.status)?,
        compressed: wire.compressed,
        ..Message::default()
    })
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireMessage {
    #[prost(int64, tag = "1")]
    id: i64,
    #[prost(string, tag = "2")]
    origin: String,
    #[prost(string, tag = "3")]
    target: String,
    #[prost(string, tag = "4")]
    identifier: String,
    #[prost(string, tag = "5")]
    data: String,
    #[prost(bytes = "vec", tag = "6")]
    compressed_data: Vec<u8>,
    #[prost(string, optional, tag = "7")]
    error: Option<String>,
    #[prost(int32, tag = "8")]
    kind: i32,
    #[prost(int32, tag = "9")]
    status: i32,
    #[prost(bool, tag = "10")]
    compressed: bool,
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod tests;
