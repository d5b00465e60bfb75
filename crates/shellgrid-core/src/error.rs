//! Error types for shellgrid.

use thiserror::Error;

use crate::SessionId;

/// Failures reported by a transport implementation.
///
/// The `Display` text is what a session shows as its error reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Credentials were rejected or the user declined to supply them
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The host key was not accepted
    #[error("Host key rejected for {0}")]
    HostKeyRejected(String),

    /// The remote end could not be reached
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// An established connection dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The remote side closed the channel
    #[error("End of stream")]
    EndOfStream,

    /// Writing to the outbound stream failed
    #[error("Write error: {0}")]
    WriteFailed(String),

    /// Operation requires an open channel
    #[error("Not connected")]
    NotConnected,

    /// Anything else the transport wants to surface
    #[error("{0}")]
    Other(String),
}

/// Main error type for shellgrid operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Session has no open transport
    #[error("Session not connected: {0}")]
    NotConnected(SessionId),

    /// Invalid terminal dimensions
    #[error("Invalid dimensions: {rows}x{cols}")]
    InvalidDimensions {
        /// Number of rows
        rows: u16,
        /// Number of columns
        cols: u16,
    },

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Snapshot storage failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
