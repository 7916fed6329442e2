use frames::{CodecError, MessageStatus};

use crate::config::ClientConfigError;

/// Outcome of a correlated request that did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransmissionError {
    /// No response arrived before the request deadline.
    #[error("request timed out")]
    Timeout,
    #[error("target process not found: {0}")]
    ProcessNotFound(String),
    /// The remote handler failed or had no handler for the identifier.
    #[error("target failed: {0}")]
    TargetError(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("server error: {0}")]
    ServerError(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The client's own connection ended before a response arrived.
    #[error("disconnected from broker")]
    Disconnected,
    #[error("codec error: {0}")]
    Codec(String),
    #[error("json error: {0}")]
    Json(String),
}

impl TransmissionError {
    /// Map a failure status and its error text.
    #[must_use]
    pub fn from_status(status: MessageStatus, error: Option<String>) -> Self {
        let text = error.unwrap_or_default();
        match status {
            MessageStatus::ProcessNotFound => Self::ProcessNotFound(text),
            MessageStatus::NetworkError => Self::NetworkError(text),
            MessageStatus::ServerError => Self::ServerError(text),
            MessageStatus::MalformedMessageError => Self::MalformedMessage(text),
            _ => Self::TargetError(text),
        }
    }
}

impl From<CodecError> for TransmissionError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<serde_json::Error> for TransmissionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid client config: {0}")]
    Config(#[from] ClientConfigError),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("registration of {0:?} rejected by broker")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("timed out")]
    Timeout,
    #[error("disconnected from broker")]
    Disconnected,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connect(value.to_string())
    }
}
