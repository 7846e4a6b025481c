//! Transport trait and implementations.
//!
//! A [`Transport`] performs exactly one fetch attempt for one location.
//! Retries, cancellation and concurrency limits are layered on top by the
//! [`Fetcher`](crate::Fetcher), so implementations stay as dumb as possible.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::{HttpOptions, HttpTransport};
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockTransport;
use crate::error::Result;
use async_trait::async_trait;

/// A single-attempt byte fetcher.
///
/// # Examples
///
/// ```
/// use komi_fetch::{error::Result, transport::Transport};
///
/// async fn page_size(transport: &dyn Transport, location: &str) -> Result<usize> {
///     Ok(transport.fetch(location).await?.len())
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable name of the transport, used in logs.
    fn name(&self) -> &str;

    /// Fetch the bytes at `location`, once.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}
