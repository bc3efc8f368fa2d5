//! Error types for stompwire-client.

use thiserror::Error;

use crate::subscription::ServerError;

/// Main error type for all stompwire operations.
#[derive(Debug, Error)]
pub enum StompError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading a config override file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, bad handshake, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker answered the handshake with an ERROR frame.
    #[error("Server error: {0}")]
    Server(String),

    /// Broker sent an ERROR frame for a subscription, or the
    /// connection carrying it was lost.
    #[error("Subscription error: {0}")]
    Subscription(ServerError),

    /// Operation on a subscription that has already ended.
    #[error("Subscription already completed")]
    AlreadyCompleted,

    /// Acknowledgment could not be sent.
    #[error("Ack error: {0}")]
    Ack(String),

    /// Connection closed (locally or by the peer).
    #[error("Connection closed")]
    ConnectionClosed,

    /// No bytes from the broker within the negotiated heart-beat window.
    #[error("Heart-beat timeout after {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    /// Dial or handshake did not finish in time.
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// The supervised task panicked or was cancelled.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

/// Result type alias using StompError.
pub type Result<T> = std::result::Result<T, StompError>;
