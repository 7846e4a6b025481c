//! Container Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A container error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// A key that simply isn't in the container is not an error; lookups return
/// `Ok(None)` for that.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file is not a cache container, or a structural field is impossible
    /// (bad magic, negative length, pointer outside its region). Rebuild it.
    #[display("corrupt cache container: {_0}")]
    CorruptFormat(#[error(not(source))] &'static str),
    /// A length field promised more bytes than the file contains.
    #[display("truncated cache container while reading {_0}")]
    Truncated(#[error(not(source))] &'static str),
    /// The container file does not exist.
    #[display("cache container not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Two chapter records share the same key; the snapshot can't be encoded.
    #[display("duplicate chapter key: {_0}")]
    DuplicateKey(#[error(not(source))] String),
    /// The encoder produced a layout that disagrees with its own header. This
    /// is a bug in the encoder, never bad input.
    #[display("container layout invariant violated: {_0}")]
    Invariant(#[error(not(source))] &'static str),
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }

    /// Returns `true` if the container itself is unusable and should be
    /// treated like a cache miss (then rebuilt).
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptFormat(_) | Self::Truncated(_))
    }
}
