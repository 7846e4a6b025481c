//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request couldn't be sent, or the response body couldn't be read.
    #[display("transport error")]
    Transport,
    /// The server answered with a non-success status code.
    #[display("unexpected status code {_0}")]
    Status(#[error(not(source))] u16),
    /// Every attempt for a resource failed; the last attempt's error is the
    /// child of this one.
    #[display("failed to fetch {location} after {attempts} attempt(s)")]
    FetchFailed { location: String, attempts: u32 },
    /// The batch was cancelled before this resource was fetched.
    #[display("fetch cancelled")]
    Cancelled,
    /// The HTTP client could not be constructed from its options.
    #[display("invalid HTTP client configuration")]
    Client,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::FetchFailed { .. } | Self::Cancelled | Self::Client => false,
        }
    }
}
