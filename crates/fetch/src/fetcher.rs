//! Parallel fetch-with-retry over a batch of locations.

use crate::TransportHandle;
use crate::error::{ErrorKind, Result};
use crate::retry::{Attempt, RetryPolicy};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// The final outcome for one location of a batch.
#[derive(Debug)]
pub struct Fetched {
    /// Position of the location in the batch it was submitted with.
    pub index: usize,
    /// The fetched bytes, or why every attempt failed.
    pub result: Result<Vec<u8>>,
}

/// Fetches batches of locations concurrently, retrying each failed resource
/// on its own.
///
/// Every location of a batch runs as its own Tokio task, so one slow or
/// retrying resource never holds up another, and fetches keep making progress
/// while the consumer is busy. Every location produces exactly one
/// [`Fetched`] outcome: its bytes from the first successful attempt, or a
/// [`FetchFailed`](ErrorKind::FetchFailed) error once the [`RetryPolicy`]
/// is used up, or [`Cancelled`](ErrorKind::Cancelled) if the batch was
/// cancelled first. Outcomes arrive in completion order, not submission
/// order.
#[derive(Clone)]
pub struct Fetcher {
    transport: TransportHandle,
    policy: RetryPolicy,
    concurrency: Option<NonZeroUsize>,
    permits: Option<Arc<Semaphore>>,
}

impl Fetcher {
    /// A fetcher with the default retry policy and no concurrency limit.
    pub fn new(transport: TransportHandle) -> Self {
        Self { transport, policy: RetryPolicy::default(), concurrency: None, permits: None }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cap the number of attempts in flight at once (`None` for no cap). The
    /// cap is shared by every batch of this fetcher and its clones; waiting
    /// out a backoff doesn't hold a slot.
    pub fn with_concurrency(mut self, concurrency: Option<NonZeroUsize>) -> Self {
        self.concurrency = concurrency;
        self.permits = concurrency.map(|n| Arc::new(Semaphore::new(n.get())));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn concurrency(&self) -> Option<NonZeroUsize> {
        self.concurrency
    }

    /// Fetch a single location, retrying according to the policy.
    ///
    /// The cancellation token is checked before every attempt and raced
    /// against the attempt, any backoff before it, and the wait for a
    /// concurrency slot.
    #[instrument(skip(self, cancel), fields(transport = self.transport.name(), attempts))]
    pub async fn fetch_one(&self, location: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut attempt = self.policy.start();
        let mut last_error = None;
        let attempts = loop {
            let number = match attempt {
                Attempt::Pending { number, .. } => number,
                Attempt::Exhausted { attempts } => break attempts,
            };
            let delay = self.policy.delay_for(number - 1);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
                outcome = self.attempt(location, delay) => outcome,
            };
            match outcome {
                Ok(bytes) => {
                    tracing::Span::current().record("attempts", number);
                    tracing::trace!(size = bytes.len(), "Fetched");
                    return Ok(bytes);
                },
                Err(err) => {
                    tracing::debug!(attempt = number, error = %*err, "Fetch attempt failed");
                    last_error = Some(err);
                    attempt = attempt.failed();
                },
            }
        };

        tracing::Span::current().record("attempts", attempts);
        tracing::warn!(attempts, "Giving up on fetch");
        let kind = ErrorKind::FetchFailed { location: location.to_string(), attempts };
        Err(match last_error {
            Some(err) => err.raise(kind),
            None => kind.into(),
        })
    }

    /// One attempt: wait out the backoff, take a concurrency slot, fetch.
    async fn attempt(&self, location: &str, delay: Duration) -> Result<Vec<u8>> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _permit = match &self.permits {
            Some(permits) => Some(permits.acquire().await.or_raise(|| ErrorKind::Cancelled)?),
            None => None,
        };
        self.transport.fetch(location).await
    }

    /// Spawn one task per location and stream one [`Fetched`] outcome per
    /// location as each completes.
    ///
    /// Must be called from within a Tokio runtime. Tasks start immediately,
    /// before the stream is first polled; dropping the stream aborts the ones
    /// still running.
    pub fn fetch_stream(
        &self,
        locations: Vec<String>,
        cancel: &CancellationToken,
    ) -> impl Stream<Item = Fetched> + Send + 'static {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(locations.len());
        for (index, location) in locations.into_iter().enumerate() {
            let fetcher = self.clone();
            let cancel = cancel.clone();
            let task_location = location.clone();
            let handle = tasks.spawn(async move { fetcher.fetch_one(&task_location, &cancel).await });
            pending.insert(handle.id(), (index, location));
        }

        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            while let Some(joined) = tasks.join_next_with_id().await {
                let (id, outcome) = match joined {
                    Ok((id, result)) => (id, Ok(result)),
                    Err(err) => (err.id(), Err(err)),
                };
                let Some((index, location)) = pending.remove(&id) else {
                    continue;
                };
                let result = match outcome {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::error!(index, location = %location, error = %err, "Fetch task did not finish");
                        Err::<Vec<u8>, _>(err).or_raise(|| ErrorKind::FetchFailed { location, attempts: 0 })
                    },
                };
                yield Fetched { index, result };
            }
        })
    }

    /// Fetch every location and hand each outcome to `callback` as it
    /// completes. Returns the number of outcomes delivered, which is always
    /// the number of locations.
    #[instrument(skip_all, fields(transport = self.transport.name(), total, failed))]
    pub async fn fetch_each<F>(
        &self,
        locations: impl IntoIterator<Item = impl Into<String>>,
        cancel: &CancellationToken,
        mut callback: F,
    ) -> usize
    where
        F: FnMut(usize, Result<Vec<u8>>),
    {
        let locations = locations.into_iter().map(Into::into).collect();
        let mut delivered = 0;
        let mut failed = 0;
        let mut outcomes = std::pin::pin!(self.fetch_stream(locations, cancel));
        while let Some(Fetched { index, result }) = outcomes.next().await {
            delivered += 1;
            failed += usize::from(result.is_err());
            callback(index, result);
        }
        tracing::Span::current().record("total", delivered);
        tracing::Span::current().record("failed", failed);
        delivered
    }

    /// Fetch every location and return the outcomes in submission order.
    pub async fn fetch_all(
        &self,
        locations: impl IntoIterator<Item = impl Into<String>>,
        cancel: &CancellationToken,
    ) -> Vec<Result<Vec<u8>>> {
        let locations: Vec<String> = locations.into_iter().map(Into::into).collect();
        let mut slots: Vec<Option<Result<Vec<u8>>>> = locations.iter().map(|_| None).collect();
        self.fetch_each(locations, cancel, |index, result| slots[index] = Some(result)).await;
        // Every slot is filled: the stream yields once per location.
        slots.into_iter().map(|slot| slot.unwrap_or_else(|| Err(ErrorKind::Cancelled.into()))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use rstest::rstest;
    use std::collections::HashSet;

    fn fetcher(transport: &Arc<MockTransport>) -> Fetcher {
        Fetcher::new(transport.clone())
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_submission_order() {
        let transport = Arc::new(
            MockTransport::default()
                .with_page("a", b"AAAA")
                .with_page("b", b"BB")
                .with_delay("a", Duration::from_millis(30)),
        );
        let cancel = CancellationToken::new();
        let results = fetcher(&transport).fetch_all(["a", "b"], &cancel).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), b"AAAA");
        assert_eq!(results[1].as_ref().unwrap(), b"BB");
    }

    #[tokio::test]
    async fn test_outcomes_arrive_in_completion_order() {
        let transport = Arc::new(
            MockTransport::default()
                .with_page("slow", b"1")
                .with_page("fast", b"2")
                .with_delay("slow", Duration::from_millis(50)),
        );
        let cancel = CancellationToken::new();
        let mut order = Vec::new();
        fetcher(&transport).fetch_each(["slow", "fast"], &cancel, |index, _| order.push(index)).await;
        assert_eq!(order, vec![1, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_consumer_does_not_stall_other_fetches() {
        let transport = Arc::new(
            MockTransport::default()
                .with_page("fast", b"1")
                .with_flaky_page("slow", 2, b"2")
                .with_delay("slow", Duration::from_millis(20)),
        );
        let cancel = CancellationToken::new();
        let fetcher = fetcher(&transport);
        let mut outcomes = std::pin::pin!(fetcher.fetch_stream(vec!["fast".to_string(), "slow".to_string()], &cancel));
        let first = outcomes.next().await.unwrap();
        assert_eq!(first.index, 0);

        // Nobody polls the stream while this sleeps; the other resource still
        // works through all of its retries.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.attempts("slow"), 3);

        let second = outcomes.next().await.unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.result.unwrap(), b"2");
        assert!(outcomes.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fetches_start_before_stream_is_polled() {
        let transport = Arc::new(MockTransport::default().with_page("a", b"A").with_page("b", b"B"));
        let cancel = CancellationToken::new();
        let fetcher = fetcher(&transport);
        let outcomes = fetcher.fetch_stream(vec!["a".to_string(), "b".to_string()], &cancel);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.total_attempts(), 2);
        let indices: HashSet<usize> = outcomes.map(|fetched| fetched.index).collect().await;
        assert_eq!(indices, HashSet::from([0, 1]));
    }

    #[tokio::test]
    async fn test_flaky_resource_succeeds_once() {
        let transport = Arc::new(MockTransport::default().with_flaky_page("p", 2, b"page"));
        let cancel = CancellationToken::new();
        let mut outcomes = Vec::new();
        let delivered = fetcher(&transport)
            .fetch_each(["p"], &cancel, |index, result| outcomes.push((index, result)))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(outcomes.len(), 1);
        let (index, result) = outcomes.pop().unwrap();
        assert_eq!(index, 0);
        assert_eq!(result.unwrap(), b"page");
        assert_eq!(transport.attempts("p"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_resource_fails_once() {
        let transport = Arc::new(MockTransport::default().with_flaky_page("p", 4, b"never seen"));
        let cancel = CancellationToken::new();
        let results = fetcher(&transport).fetch_all(["p"], &cancel).await;
        assert_eq!(results.len(), 1);
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert_eq!(*err, ErrorKind::FetchFailed { location: "p".to_string(), attempts: 4 });
        assert_eq!(transport.attempts("p"), 4);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(5, 6)]
    #[tokio::test]
    async fn test_retry_budget_is_per_resource(#[case] max_retries: u32, #[case] expected: usize) {
        let transport = Arc::new(MockTransport::default().with_broken_page("a").with_broken_page("b"));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy { max_retries, ..RetryPolicy::default() };
        let results = fetcher(&transport).with_policy(policy).fetch_all(["a", "b"], &cancel).await;
        assert!(results.iter().all(Result::is_err));
        // One resource failing never eats into the other's retries.
        assert_eq!(transport.attempts("a"), expected);
        assert_eq!(transport.attempts("b"), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_batch_delivers_every_index_once() {
        let mut transport = MockTransport::default();
        let mut locations = Vec::new();
        for i in 0..30 {
            let location = format!("page/{i}");
            transport = match i % 3 {
                0 => transport.with_page(&location, vec![i as u8]),
                1 => transport.with_flaky_page(&location, 2, vec![i as u8]),
                _ => transport.with_broken_page(&location),
            };
            locations.push(location);
        }
        let transport = Arc::new(transport);
        let cancel = CancellationToken::new();
        let mut seen = HashSet::new();
        let mut failures = 0;
        let delivered = fetcher(&transport)
            .fetch_each(&locations, &cancel, |index, result| {
                assert!(seen.insert(index), "index {index} delivered twice");
                match result {
                    Ok(bytes) => assert_eq!(bytes, vec![index as u8]),
                    Err(err) => {
                        assert!(matches!(&*err, ErrorKind::FetchFailed { attempts: 4, .. }));
                        failures += 1;
                    },
                }
            })
            .await;
        assert_eq!(delivered, 30);
        assert_eq!(seen.len(), 30);
        assert_eq!(failures, 10);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let transport = Arc::new(MockTransport::default());
        let cancel = CancellationToken::new();
        let locations: [&str; 0] = [];
        assert!(fetcher(&transport).fetch_all(locations, &cancel).await.is_empty());
        assert_eq!(transport.total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let transport = Arc::new(MockTransport::default().with_page("a", b"A").with_page("b", b"B"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = fetcher(&transport).fetch_all(["a", "b"], &cancel).await;
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(*result.unwrap_err(), ErrorKind::Cancelled);
        }
        assert_eq!(transport.total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let transport = Arc::new(MockTransport::default().with_broken_page("a"));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let fetcher = fetcher(&transport).with_policy(policy);
        let result = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch_one("a", &cancel)).await.unwrap();
        assert_eq!(*result.unwrap_err(), ErrorKind::Cancelled);
        assert_eq!(transport.attempts("a"), 1);
    }

    #[rstest]
    #[case(Some(1), 1)]
    #[case(Some(3), 3)]
    #[case(None, 8)]
    #[tokio::test]
    async fn test_concurrency_cap(#[case] cap: Option<usize>, #[case] expected_peak: usize) {
        let mut transport = MockTransport::default();
        let locations: Vec<String> = (0..8).map(|i| format!("page/{i}")).collect();
        for location in &locations {
            transport = transport.with_page(location, b"x").with_delay(location, Duration::from_millis(20));
        }
        let transport = Arc::new(transport);
        let cancel = CancellationToken::new();
        let results = fetcher(&transport)
            .with_concurrency(cap.and_then(NonZeroUsize::new))
            .fetch_all(&locations, &cancel)
            .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(transport.peak_in_flight(), expected_peak);
    }
}
