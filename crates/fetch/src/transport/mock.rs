//! Scripted in-memory transport for testing.

use super::Transport;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    /// Failed attempts still to hand out before succeeding.
    failures: usize,
    /// `None` fails forever.
    body: Option<Vec<u8>>,
    delay: Duration,
    attempts: usize,
}

/// In-memory transport with per-location scripted behaviour.
///
/// Locations that were never scripted answer with a 404. Every attempt is
/// counted, and the peak number of attempts in flight at once is tracked so
/// tests can check concurrency limits.
///
/// # Examples
///
/// ```
/// use komi_fetch::transport::{MockTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = MockTransport::default()
///     .with_page("a.jpg", b"AAAA")
///     .with_flaky_page("b.jpg", 1, b"BB");
/// assert_eq!(transport.fetch("a.jpg").await.unwrap(), b"AAAA");
/// assert!(transport.fetch("b.jpg").await.is_err());
/// assert_eq!(transport.fetch("b.jpg").await.unwrap(), b"BB");
/// assert_eq!(transport.attempts("b.jpg"), 2);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    /// A location that always succeeds.
    pub fn with_page(self, location: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.with_flaky_page(location, 0, body)
    }

    /// A location that fails `failures` times, then succeeds.
    pub fn with_flaky_page(self, location: impl Into<String>, failures: usize, body: impl Into<Vec<u8>>) -> Self {
        self.script(location, |script| {
            script.failures = failures;
            script.body = Some(body.into());
        })
    }

    /// A location that never succeeds.
    pub fn with_broken_page(self, location: impl Into<String>) -> Self {
        self.script(location, |script| script.body = None)
    }

    /// Make every attempt at `location` take at least `delay`.
    pub fn with_delay(self, location: impl Into<String>, delay: Duration) -> Self {
        self.script(location, |script| script.delay = delay)
    }

    /// Number of attempts made for `location` so far.
    pub fn attempts(&self, location: &str) -> usize {
        self.lock().get(location).map_or(0, |script| script.attempts)
    }

    /// Total number of attempts across all locations.
    pub fn total_attempts(&self) -> usize {
        self.lock().values().map(|script| script.attempts).sum()
    }

    /// Number of attempts in flight right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of attempts that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script(self, location: impl Into<String>, change: impl FnOnce(&mut Script)) -> Self {
        change(self.lock().entry(location.into()).or_default());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Script>> {
        // A panicking test thread can poison the lock; the data is still usable.
        self.scripts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one attempt and decide its outcome without holding the lock
    /// across an await.
    fn next_outcome(&self, location: &str) -> (Duration, Result<Vec<u8>>) {
        let mut scripts = self.lock();
        let Some(script) = scripts.get_mut(location) else {
            return (Duration::ZERO, Err(ErrorKind::Status(404).into()));
        };
        script.attempts += 1;
        let outcome = match &script.body {
            Some(body) if script.failures == 0 => Ok(body.clone()),
            Some(_) => {
                script.failures -= 1;
                Err(ErrorKind::Status(503).into())
            },
            None => Err(ErrorKind::Status(500).into()),
        };
        (script.delay, outcome)
    }
}

/// Counts one attempt as in flight until dropped, including when the fetch
/// future is dropped mid-delay.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak);
        let (delay, outcome) = self.next_outcome(location);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
