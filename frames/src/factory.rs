//! Message factory: every outbound message is built here.
//!
//! DESIGN
//! ======
//! - Payloads at or above the compression threshold are deflated into
//!   `compressed_data` and `data` is cleared.
//! - Failure statuses without an explicit error get a fixed sentence.
//! - Application requests draw ids from a per-factory sequence starting at
//!   0; control messages carry `NO_ID` and are matched by identifier.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::{
    BROKER_NAME, CodecError, Message, MessageStatus, MessageType, NO_ID, ProcessUpdateData, RemoteProcessData,
    UNKNOWN_IDENTIFIER, UNKNOWN_ORIGIN, UNKNOWN_TARGET, compress,
};

/// Fixed error sentence for a failure status, `None` for non-failures.
#[must_use]
pub fn default_error_text(status: MessageStatus) -> Option<&'static str> {
    match status {
        MessageStatus::NetworkError => Some("A network error occurred while delivering the message."),
        MessageStatus::MalformedMessageError => Some("The message could not be parsed and was discarded."),
        MessageStatus::ProcessNotFound => Some("The target process is not registered with the broker."),
        MessageStatus::ServerError => Some("The broker failed while processing the message."),
        MessageStatus::TargetError => Some("The target process failed to handle the message."),
        MessageStatus::Unknown | MessageStatus::Success => None,
    }
}

#[derive(Debug)]
pub struct MessageFactory {
    compression_threshold: usize,
    next_id: AtomicI64,
}

impl MessageFactory {
    #[must_use]
    pub fn new(compression_threshold: usize) -> Self {
        Self { compression_threshold, next_id: AtomicI64::new(0) }
    }

    /// Next id in this factory's strictly increasing sequence.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Application request with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Compression`] if a large payload fails to deflate.
    pub fn request(
        &self,
        identifier: impl Into<String>,
        origin: impl Into<String>,
        target: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<Message, CodecError> {
        let message = Message {
            id: self.next_id(),
            origin: origin.into(),
            target: target.into(),
            identifier: identifier.into(),
            kind: MessageType::Request,
            ..Message::default()
        };
        self.pack(message, data.into())
    }

    /// Reply to `request` from `origin`. `Err` text becomes a `TargetError`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Compression`] if a large payload fails to deflate.
    pub fn response(
        &self,
        request: &Message,
        origin: impl Into<String>,
        outcome: Result<String, String>,
    ) -> Result<Message, CodecError> {
        let reply = Message {
            id: request.id,
            origin: origin.into(),
            target: request.origin.clone(),
            identifier: request.identifier.clone(),
            kind: MessageType::Response,
            ..Message::default()
        };
        match outcome {
            Ok(data) => self.pack(Message { status: MessageStatus::Success, ..reply }, data),
            Err(error) => Ok(Message { status: MessageStatus::TargetError, error: Some(error), ..reply }),
        }
    }

    /// Payload-free reply to `request`'s origin carrying only `status`.
    #[must_use]
    pub fn failure(request: &Message, status: MessageStatus) -> Message {
        Self::with_default_error(Message {
            id: request.id,
            origin: request.target.clone(),
            target: request.origin.clone(),
            identifier: request.identifier.clone(),
            kind: MessageType::Response,
            status,
            ..Message::default()
        })
    }

    /// Control request (register, terminate, list) carrying `NO_ID`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Compression`] if a large payload fails to deflate.
    pub fn control(
        &self,
        identifier: impl Into<String>,
        origin: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<Message, CodecError> {
        let message = Message {
            id: NO_ID,
            origin: origin.into(),
            target: BROKER_NAME.to_owned(),
            identifier: identifier.into(),
            kind: MessageType::Request,
            ..Message::default()
        };
        self.pack(message, data.into())
    }

    /// Broker notice about a registration or termination outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] or [`CodecError::Compression`].
    pub fn process_update(
        &self,
        identifier: &str,
        target: impl Into<String>,
        update: &ProcessUpdateData,
    ) -> Result<Message, CodecError> {
        let message = Message {
            id: NO_ID,
            origin: BROKER_NAME.to_owned(),
            target: target.into(),
            identifier: identifier.to_owned(),
            kind: MessageType::Response,
            status: MessageStatus::Success,
            ..Message::default()
        };
        self.pack(message, serde_json::to_string(update)?)
    }

    /// Broker reply to a `request-processes-info` request.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] or [`CodecError::Compression`].
    pub fn process_listing(
        &self,
        target: impl Into<String>,
        processes: &[RemoteProcessData],
    ) -> Result<Message, CodecError> {
        let message = Message {
            id: NO_ID,
            origin: BROKER_NAME.to_owned(),
            target: target.into(),
            identifier: crate::REQUEST_PROCESSES_INFO.to_owned(),
            kind: MessageType::Response,
            status: MessageStatus::Success,
            ..Message::default()
        };
        self.pack(message, serde_json::to_string(processes)?)
    }

    /// Stand-in for a frame that could not be decoded. `diagnostic` is kept
    /// uncompressed so it can be logged directly.
    #[must_use]
    pub fn malformed(diagnostic: impl Into<String>) -> Message {
        Self::with_default_error(Message {
            id: NO_ID,
            origin: UNKNOWN_ORIGIN.to_owned(),
            target: UNKNOWN_TARGET.to_owned(),
            identifier: UNKNOWN_IDENTIFIER.to_owned(),
            data: diagnostic.into(),
            status: MessageStatus::MalformedMessageError,
            ..Message::default()
        })
    }

    /// Fill `error` from [`default_error_text`] when a failure status has none.
    #[must_use]
    pub fn with_default_error(mut message: Message) -> Message {
        if message.error.is_none() {
            message.error = default_error_text(message.status).map(str::to_owned);
        }
        message
    }

    fn pack(&self, mut message: Message, data: String) -> Result<Message, CodecError> {
        if data.len() >= self.compression_threshold {
            message.compressed_data = compress(&data)?;
            message.data = String::new();
            message.compressed = true;
        } else {
            message.data = data;
            message.compressed = false;
        }
        Ok(message)
    }
}

#[cfg(test)]
#[path = "factory_test.rs"]
mod tests;
