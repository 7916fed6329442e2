//! Stream framer: turns a fragment-prone byte stream into messages.
//!
//! DESIGN
//! ======
//! Bytes are appended to a per-connection buffer. Every time the buffer
//! contains the delimiter, the bytes before it are decoded and the buffer
//! restarts after it. A read may therefore yield zero, one, or many
//! messages, and a delimiter split across two reads is still found.
//!
//! ERROR HANDLING
//! ==============
//! Undecodable bodies are never dropped silently: they come back as a
//! `MalformedMessageError` message carrying the diagnostic. An unterminated
//! buffer that reaches the size limit is cleared without a report.

use tracing::warn;

use crate::{Codec, Message, MessageFactory};

/// Unterminated bytes tolerated before the buffer is thrown away.
pub const MAX_BUFFERED_BYTES: usize = 1_000_000_000;

#[derive(Debug)]
pub struct Framer {
    codec: Codec,
    buffer: Vec<u8>,
    limit: usize,
}

impl Framer {
    #[must_use]
    pub fn new(codec: Codec) -> Self {
        Self::with_limit(codec, MAX_BUFFERED_BYTES)
    }

    /// Framer with a custom overflow limit.
    #[must_use]
    pub fn with_limit(codec: Codec, limit: usize) -> Self {
        Self { codec, buffer: Vec::new(), limit }
    }

    #[must_use]
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Bytes buffered after the last delimiter.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feed one read's worth of bytes; returns every message it completed,
    /// in stream order.
    pub fn append(&mut self, bytes: &[u8]) -> Vec<Message> {
        let delimiter = self.codec.delimiter();
        if delimiter.is_empty() {
            return Vec::new();
        }

        // A delimiter may straddle the previous read and this one.
        let mut search_from = self.buffer.len().saturating_sub(delimiter.len() - 1);
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = find(&self.buffer[search_from..], delimiter) {
            let end = search_from + offset;
            let body = &self.buffer[consumed..end];
            if !body.trim_ascii().is_empty() {
                messages.push(decode_or_malformed(&self.codec, body));
            }
            consumed = end + delimiter.len();
            search_from = consumed;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        if self.buffer.len() >= self.limit {
            warn!(buffered = self.buffer.len(), limit = self.limit, "framer: buffer limit reached, discarding");
            self.buffer.clear();
        }
        messages
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn decode_or_malformed(codec: &Codec, body: &[u8]) -> Message {
    match codec.decode(body) {
        Ok(message) => message,
        Err(e) => {
            let text = String::from_utf8_lossy(body);
            MessageFactory::malformed(format!("{e}: {text}"))
        }
    }
}

#[cfg(test)]
#[path = "framer_test.rs"]
mod tests;
