//! Error types for blackhole-core.

use thiserror::Error;

/// Main error type for blackhole operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation or malformed message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Session not found for given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Transport layer error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// PTY error.
    #[error("pty error: {message}")]
    Pty { message: String },

    /// Invalid or refused configuration.
    #[error("config error: {message}")]
    Config { message: String },
}

impl Error {
    /// Returns true if this error is transient and reconnection may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ConnectionClosed | Error::Timeout | Error::Io(_)
        )
    }

    /// Returns true if this error is fatal and reconnection won't help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol { .. } | Error::Config { .. })
    }
}

/// Convenience result type for blackhole operations.
pub type Result<T> = std::result::Result<T, Error>;
