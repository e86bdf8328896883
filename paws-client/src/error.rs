//! Client error types.

use thiserror::Error;

/// Errors returned to the caller of a client operation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] paws_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("token already in use: {0}")]
    DuplicateToken(String),

    #[error("no subscription for token: {0}")]
    UnknownSubscription(String),

    #[error("unexpected status: {status}")]
    UnexpectedStatus { status: u16 },

    #[error("response has no LOCATION header")]
    MissingLocation,

    #[error("record error: {0}")]
    Record(#[from] crate::record::RecordError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::NotConnected
                | ClientError::Connect(_)
        )
    }
}

/// Errors recorded by the dispatcher while routing inbound frames.
///
/// These never reach an operation's caller; they are logged and published
/// to observers of [`crate::Dispatcher::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("malformed frame: {0}")]
    FrameDecode(String),

    #[error("orphan message for token {token}")]
    Orphan { token: String },

    #[error("record decode failed for token {token}: {reason}")]
    RecordDecode { token: String, reason: String },

    #[error("subscription handler panicked for token {token}")]
    HandlerPanicked { token: String },
}
