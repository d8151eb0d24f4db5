//! Error types shared by the search core and the backends

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while locating, patching or hashing a key
///
/// The first three variants are raised by the core and are recoverable: the
/// offending candidate or key is rejected and the search carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The DER buffer does not have the SEQUENCE { INTEGER, INTEGER } shape
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A destination or the message padding is too small for the write
    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    /// A value cannot be represented in the encoding it has to live in
    #[error("encoding constraint violated: {0}")]
    EncodingConstraintViolation(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid exponent range: {0}")]
    InvalidRange(String),

    /// A trial driver method was called out of order
    #[error("trial driver is {actual}, expected {expected}")]
    TrialState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("generation stopped by user")]
    Stopped,
}

impl Error {
    /// Whether the search may skip the candidate and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput(_)
                | Error::InsufficientCapacity(_)
                | Error::EncodingConstraintViolation(_)
        )
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedInput(msg.into())
    }

    pub(crate) fn capacity(msg: impl Into<String>) -> Self {
        Error::InsufficientCapacity(msg.into())
    }

    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Error::EncodingConstraintViolation(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
