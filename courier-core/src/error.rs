//! Error types for Courier
//!
//! One error enum covers every failure class the framework distinguishes:
//! protocol, discovery, dispatch, transport and correlation.

use crate::entity::ResponseCode;

/// Standard error type for Courier operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Malformed frame on the wire; fatal to the connection that produced it
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No live instance is registered for the service
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The registry backend could not be reached or rejected the operation
    #[error("Registry error: {0}")]
    Registry(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote side answered with a non-success response
    #[error("Invocation failed ({code}): {message}")]
    Invocation { code: ResponseCode, message: String },

    /// Writing to or reading from a connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal state contradicts a framework invariant
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Timeout occurred
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused => Error::Connection(error.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Error::Transport(error.to_string()),
            std::io::ErrorKind::TimedOut => Error::Timeout(error.to_string()),
            _ => Error::Io(error.to_string()),
        }
    }
}

/// Result type for Courier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories, matching the taxonomy the framework reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Protocol = 1,
    Discovery = 2,
    Dispatch = 3,
    Transport = 4,
    Correlation = 5,
    Timeout = 6,
    Serialization = 7,
    Config = 8,
    InvalidArgument = 9,
}

impl Error {
    /// Get the error category for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) => ErrorCode::Protocol,
            Error::ServiceNotFound(_) | Error::Registry(_) | Error::NotFound(_) => {
                ErrorCode::Discovery
            }
            Error::Invocation { .. } => ErrorCode::Dispatch,
            Error::Transport(_) | Error::Connection(_) | Error::Io(_) => ErrorCode::Transport,
            Error::IllegalState(_) => ErrorCode::Correlation,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Serialization(_) => ErrorCode::Serialization,
            Error::Config(_) => ErrorCode::Config,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Transport(_) | Error::Connection(_)
        )
    }

    /// Whether the connection that produced this error must be closed
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Transport(_) | Error::Io(_))
    }
}
