//! Wire settings shared by broker and clients.
//!
//! Both sides of a connection must agree on the delimiter and encoding; the
//! compression threshold only affects what a side sends.

use crate::{Codec, Encoding, Framer, MessageFactory};

/// One NUL byte.
pub const DEFAULT_DELIMITER: &[u8] = &[0];

/// Payloads at least this many bytes long are deflated before sending.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 300;

/// Error returned by [`WireConfig::validate`] and [`parse_delimiter_hex`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WireConfigError {
    #[error("delimiter must not be empty")]
    EmptyDelimiter,
    /// Only ASCII control bytes are guaranteed absent from encoded bodies.
    #[error("delimiter byte {0:#04x} may occur inside encoded messages")]
    UnsafeDelimiter(u8),
    #[error("invalid delimiter hex: {0}")]
    InvalidDelimiterHex(String),
    #[error("compression threshold must be greater than zero")]
    ZeroCompressionThreshold,
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireConfig {
    pub delimiter: Vec<u8>,
    pub encoding: Encoding,
    pub compression_threshold: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_vec(),
            encoding: Encoding::default(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl WireConfig {
    /// Check the invariants the framer relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), WireConfigError> {
        if self.delimiter.is_empty() {
            return Err(WireConfigError::EmptyDelimiter);
        }
        if let Some(&byte) = self.delimiter.iter().find(|b| **b >= 0x20) {
            return Err(WireConfigError::UnsafeDelimiter(byte));
        }
        if self.compression_threshold == 0 {
            return Err(WireConfigError::ZeroCompressionThreshold);
        }
        Ok(())
    }

    #[must_use]
    pub fn codec(&self) -> Codec {
        Codec::new(self.encoding, self.delimiter.clone())
    }

    /// Fresh framer with an empty buffer, one per connection.
    #[must_use]
    pub fn framer(&self) -> Framer {
        Framer::new(self.codec())
    }

    /// Fresh factory whose id sequence starts at 0, one per connection.
    #[must_use]
    pub fn factory(&self) -> MessageFactory {
        MessageFactory::new(self.compression_threshold)
    }
}

/// Parse a delimiter written as hex, e.g. `"00"` or `"1e1f"`.
///
/// # Errors
///
/// Returns [`WireConfigError::InvalidDelimiterHex`] for odd-length or
/// non-hex input.
pub fn parse_delimiter_hex(text: &str) -> Result<Vec<u8>, WireConfigError> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    if text.is_empty() {
        return Err(WireConfigError::EmptyDelimiter);
    }
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(WireConfigError::InvalidDelimiterHex(text.to_owned()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| WireConfigError::InvalidDelimiterHex(text.to_owned()))
}
