//! Error types for worker-fetch.

use std::fmt;

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (worker options, ready line).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, duplicate id, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the other side of the channel.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No handler is registered for the requested entry.
    #[error("No fetch handler registered for entry '{0}'")]
    HandlerNotFound(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transfer was cancelled by a signal or by the peer.
    #[error("Request cancelled")]
    Cancelled,

    /// Channel closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Which end of the channel an error was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The caller side, which originates requests.
    Dispatcher,
    /// The worker side, which runs handlers.
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Dispatcher => f.write_str("dispatcher"),
            Side::Server => f.write_str("server"),
        }
    }
}

/// An error rebuilt from the `message` and `stack` strings carried on the wire.
///
/// The source error value does not cross the channel; only its rendering
/// does.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Human-readable message.
    pub message: String,
    /// Stack or cause chain, when the sender had one.
    pub stack: Option<String>,
    /// Side that captured the error.
    pub origin: Side,
}

impl RemoteError {
    /// Create a remote error.
    pub fn new(message: impl Into<String>, stack: Option<String>, origin: Side) -> Self {
        Self {
            message: message.into(),
            stack,
            origin,
        }
    }
}
