//! Concurrent fetching of page images with per-resource retries.
//!
//! A [`Fetcher`] takes a batch of locations and produces exactly one outcome
//! per location, as soon as that location succeeds or runs out of attempts.
//! The actual I/O sits behind the [`Transport`](transport::Transport) trait:
//! [`HttpTransport`](transport::HttpTransport) for real use, and a scripted
//! `MockTransport` behind the `mock` feature for tests.

pub mod error;
mod fetcher;
mod retry;
pub mod transport;

pub use crate::fetcher::{Fetched, Fetcher};
pub use crate::retry::{Attempt, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
use std::sync::Arc;

pub type TransportHandle = Arc<dyn transport::Transport>;
