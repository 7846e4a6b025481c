//! HTTP(S) transport backed by [`reqwest`].

use super::Transport;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::time::Duration;
use tracing::instrument;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("komi/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    /// Whole-request timeout, covering connect, headers and body.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, user_agent: DEFAULT_USER_AGENT.to_string() }
    }
}

/// Fetches locations as URLs with a shared connection pool.
///
/// Any non-2xx response is a failed attempt ([`Status`](ErrorKind::Status));
/// so is a connection, timeout or body-read error
/// ([`Transport`](ErrorKind::Transport)).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(level = "trace", skip(self), fields(status, size))]
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let response = self.client.get(location).send().await.or_raise(|| ErrorKind::Transport)?;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        let body = response.bytes().await.or_raise(|| ErrorKind::Transport)?;
        tracing::Span::current().record("size", body.len());
        Ok(body.to_vec())
    }
}
