// Error types for the delivery engine

use thiserror::Error;

/// Result type alias for delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors that can occur while delivering an envelope
///
/// Errors are carried inside receipts, so every variant is `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Required configuration is missing or contradictory
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O failure while talking to the storage or authority server
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("upload rejected with status {status}")]
    TransportStatus { status: u16 },

    /// Successful status but an unparseable or invalid body
    #[error("unrecognized response: {0}")]
    UnrecognizedResponse(String),

    /// Token cache could not obtain either lock path within its budget
    #[error("token cache lock timed out after {attempts} attempts")]
    LockTimeout { attempts: u32 },

    /// The session retry budget ran out before a successful attempt
    #[error("exceeded maximum retries after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        DeliveryError::Configuration(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        DeliveryError::Transport(msg.into())
    }

    /// Create an unrecognized-response error
    pub fn unrecognized(msg: impl Into<String>) -> Self {
        DeliveryError::UnrecognizedResponse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        DeliveryError::Internal(msg.into())
    }

    /// Whether this error was fatal at configuration time (never retried)
    pub fn is_configuration(&self) -> bool {
        matches!(self, DeliveryError::Configuration(_))
    }
}
