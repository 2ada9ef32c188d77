//! Relay error types

use thiserror::Error;

/// Errors raised while loading configuration, storing articles or handing
/// them to a transport
///
/// Acceptance verdicts and lookup misses are not errors; they are returned
/// as ordinary values.
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error while reading or writing a spool, batch or config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed feed record
    #[error("feeds line {line}: {message}")]
    Parse {
        /// Physical line where the offending record starts
        line: usize,
        /// What was wrong with it
        message: String,
    },

    /// A physical line exceeded the reader's limit
    #[error("line {line} longer than {limit} bytes")]
    LineTooLong {
        /// Physical line number
        line: usize,
        /// Limit in bytes
        limit: usize,
    },

    /// The file ended while a backslash continuation was pending
    #[error("unterminated continuation at line {line}")]
    UnterminatedContinuation {
        /// Physical line carrying the dangling backslash
        line: usize,
    },

    /// A record ended before a required field
    #[error("feeds line {line}: missing {field} field")]
    MissingField {
        /// Physical line where the record starts
        line: usize,
        /// Name of the first missing field
        field: &'static str,
    },

    /// No feed with this name is configured
    #[error("No such feed: {0}")]
    NoSuchFeed(String),

    /// No active group with this name
    #[error("No such newsgroup: {0}")]
    NoSuchGroup(String),

    /// Article header missing or unusable
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Newsgroup name rejected by validation
    #[error("Invalid newsgroup name: {0}")]
    InvalidGroupName(String),

    /// Transport command could not be run or exited unsuccessfully
    #[error("transmission to {site} failed: {message}")]
    Transport {
        /// Target system
        site: String,
        /// Failure detail
        message: String,
    },

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Whether this error came from parsing configuration
    ///
    /// Callers abort the run on these before touching the spool or any peer.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RelayError::Parse { .. }
                | RelayError::LineTooLong { .. }
                | RelayError::UnterminatedContinuation { .. }
                | RelayError::MissingField { .. }
        )
    }
}

/// Result type alias using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
