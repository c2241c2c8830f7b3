//! Error types

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::dsn::Target;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying transport
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or DSN
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected protocol data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication could not be completed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Error packet sent by the server
    #[error("server error {code} ({state}): {message}")]
    Server {
        /// MySQL error number (e.g. 1045)
        code: u16,
        /// SQLSTATE
        state: String,
        /// Human-readable message
        message: String,
    },

    /// Server closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Connection is in use by another command
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Illegal state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Operation did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Retry deadline passed; carries the last attempt's failure, if any
    #[error("deadline exceeded after {elapsed:?}{}", .last.as_ref().map(|e| format!(", last error: {}", e)).unwrap_or_default())]
    DeadlineExceeded {
        /// Time since the first attempt
        elapsed: Duration,
        /// Failure of the last attempt that ran to completion
        #[source]
        last: Option<Box<Error>>,
    },

    /// Operation was cancelled through a cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Retry budget exhausted, last failure was opening the database handle
    #[error("failed to open {target} after {attempts} attempt(s) in {elapsed:?}: {source}")]
    OpenFailed {
        /// Host, port and database the DSN pointed at
        target: Target,
        /// Attempts made
        attempts: u32,
        /// Total time spent
        elapsed: Duration,
        /// Last underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Retry budget exhausted, last failure was the liveness probe
    #[error("liveness probe of {target} failed after {attempts} attempt(s) in {elapsed:?}: {source}")]
    ProbeFailed {
        /// Host, port and database the DSN pointed at
        target: Target,
        /// Attempts made
        attempts: u32,
        /// Total time spent
        elapsed: Duration,
        /// Last underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Named connection is not registered
    #[error("connection {0} not found")]
    NotFound(String),

    /// Closing a session failed
    #[error("failed to close connection {name}: {source}")]
    CloseFailed {
        /// Logical connection name
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Failure the caller did not mark as expected; the run cannot continue
    #[error("unrecoverable: {0}")]
    Unrecoverable(#[source] Box<Error>),
}

impl Error {
    /// Whether the top-level caller should abort the run
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unrecoverable(_))
    }

    /// Whether this is a lookup failure for a connection name
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// MySQL error number, looking through wrapping variants
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server { code, .. } => Some(*code),
            Error::OpenFailed { source, .. }
            | Error::ProbeFailed { source, .. }
            | Error::CloseFailed { source, .. }
            | Error::Unrecoverable(source) => source.server_code(),
            Error::DeadlineExceeded { last, .. } => last.as_ref().and_then(|e| e.server_code()),
            _ => None,
        }
    }

    /// Short label for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::Server { .. } => "server",
            Error::ConnectionClosed => "connection_closed",
            Error::ConnectionBusy(_) => "connection_busy",
            Error::InvalidState { .. } => "invalid_state",
            Error::Timeout(_) => "timeout",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::Cancelled => "cancelled",
            Error::OpenFailed { .. } => "open_failed",
            Error::ProbeFailed { .. } => "probe_failed",
            Error::NotFound(_) => "not_found",
            Error::CloseFailed { .. } => "close_failed",
            Error::Unrecoverable(_) => "unrecoverable",
        }
    }
}
