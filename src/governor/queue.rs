//! Single-consumer request queue with head-of-queue retry on rate limits.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::backoff::BackoffState;
use super::config::{GovernorConfig, GovernorStats};
use super::error::{FetchError, GovernorError};
use super::sleeper::{Sleeper, TokioSleeper};

type RequestFn<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, FetchError>> + Send>;

/// A deferred request and the channel its caller is waiting on.
struct QueuedRequest<T> {
    run: RequestFn<T>,
    on_complete: oneshot::Sender<Result<T, GovernorError>>,
    enqueued_at: Instant,
    attempts: u32,
}

struct GovernorState<T> {
    queue: VecDeque<QueuedRequest<T>>,
    processing: bool,
    backoff: BackoffState,
    total_requests: u64,
    rate_limit_hits: u64,
}

/// Serializes requests to one rate-limited API.
///
/// At most one request is dispatched at a time. A request answered with
/// [`FetchError::RateLimited`] goes back to the head of the queue and the
/// shared delay doubles; any other outcome settles the caller's future.
/// Every dispatch attempt is followed by the current delay.
///
/// Cloning is cheap and every clone drives the same queue.
pub struct RequestGovernor<T> {
    name: Arc<str>,
    config: GovernorConfig,
    state: Arc<Mutex<GovernorState<T>>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T> Clone for RequestGovernor<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<T> std::fmt::Debug for RequestGovernor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGovernor")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> RequestGovernor<T> {
    /// Create a governor that paces with real tokio timers.
    pub fn new(name: &str, config: GovernorConfig) -> Self {
        Self::with_sleeper(name, config, Arc::new(TokioSleeper))
    }

    /// Create a governor with a custom delay implementation.
    pub fn with_sleeper(name: &str, config: GovernorConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let backoff = BackoffState::new(config.base_delay, config.max_delay);
        Self {
            name: Arc::from(name),
            config,
            state: Arc::new(Mutex::new(GovernorState {
                queue: VecDeque::new(),
                processing: false,
                backoff,
                total_requests: 0,
                rate_limit_hits: 0,
            })),
            sleeper,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request and wait for its final outcome.
    ///
    /// `request_fn` is invoked once per attempt, so it can pick a fresh
    /// credential each time it is retried.
    pub async fn enqueue<F, Fut>(&self, request_fn: F) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.submit(request_fn).await
    }

    /// Queue a request, returning a future for its outcome.
    ///
    /// The request is at the tail of the queue when this returns, so
    /// successive calls preserve submission order. Dropping the returned
    /// future before dispatch cancels the request. Must be called from
    /// within a tokio runtime.
    pub fn submit<F, Fut>(&self, mut request_fn: F) -> RequestFuture<T>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = QueuedRequest {
            run: Box::new(move || request_fn().boxed()),
            on_complete: tx,
            enqueued_at: Instant::now(),
            attempts: 0,
        };

        let start = {
            let mut state = self.lock();
            state.queue.push_back(task);
            !std::mem::replace(&mut state.processing, true)
        };

        if start {
            let governor = self.clone();
            tokio::spawn(async move { governor.process().await });
        }

        RequestFuture { rx }
    }

    /// Delay currently applied between dispatches.
    pub fn current_delay(&self) -> Duration {
        self.lock().backoff.current()
    }

    /// Number of requests waiting for dispatch (excludes the one in flight).
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self) -> GovernorStats {
        let state = self.lock();
        GovernorStats {
            current_delay: state.backoff.current(),
            in_backoff: state.backoff.in_backoff(),
            queued: state.queue.len(),
            total_requests: state.total_requests,
            rate_limit_hits: state.rate_limit_hits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GovernorState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain the queue. Only one instance runs per governor, guarded by
    /// `processing`, which is cleared under the same lock that observes an
    /// empty queue.
    async fn process(self) {
        loop {
            let mut task = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            if task.on_complete.is_closed() {
                debug!("{}: caller went away, dropping queued request", self.name);
                continue;
            }

            if let Some(max_wait) = self.config.max_queue_wait {
                let waited = task.enqueued_at.elapsed();
                if waited > max_wait {
                    debug!("{}: request expired after {:?} in queue", self.name, waited);
                    let _ = task.on_complete.send(Err(GovernorError::Expired { waited }));
                    continue;
                }
            }

            task.attempts += 1;
            self.lock().total_requests += 1;

            let run = &mut task.run;
            let outcome = AssertUnwindSafe(async move { run().await })
                .catch_unwind()
                .await;

            let pause = {
                let mut state = self.lock();
                match outcome {
                    Err(_) => {
                        warn!("{}: request panicked, continuing with the queue", self.name);
                        let _ = task.on_complete.send(Err(GovernorError::Panicked));
                        state.backoff.current()
                    }
                    Ok(Ok(value)) => {
                        if state.backoff.in_backoff() {
                            debug!("{}: recovered from rate limit backoff", self.name);
                        }
                        state.backoff.reset();
                        let _ = task.on_complete.send(Ok(value));
                        state.backoff.current()
                    }
                    Ok(Err(FetchError::RateLimited { retry_after })) => {
                        state.rate_limit_hits += 1;
                        let delay = state.backoff.escalate();
                        warn!(
                            "{} rate limited (attempt {}), retrying in {:?}",
                            self.name, task.attempts, delay
                        );
                        let cap = state.backoff.cap();
                        state.queue.push_front(task);
                        retry_after.map_or(delay, |hint| delay.max(hint.min(cap)))
                    }
                    Ok(Err(e)) => {
                        debug!("{}: request failed: {}", self.name, e);
                        let _ = task.on_complete.send(Err(GovernorError::Fetch(e)));
                        state.backoff.current()
                    }
                }
            };

            self.sleeper.sleep(pause).await;
        }
    }
}

/// Outcome of a submitted request.
///
/// Resolves to [`GovernorError::Cancelled`] if the governor dropped the
/// request without settling it.
#[must_use = "dropping a RequestFuture cancels the queued request"]
pub struct RequestFuture<T> {
    rx: oneshot::Receiver<Result<T, GovernorError>>,
}

impl<T> Future for RequestFuture<T> {
    type Output = Result<T, GovernorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(GovernorError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    fn governor(sleeper: Arc<RecordingSleeper>) -> RequestGovernor<u32> {
        RequestGovernor::with_sleeper(
            "test",
            GovernorConfig::with_delays(Duration::from_millis(100), Duration::from_millis(1000)),
            sleeper,
        )
    }

    #[tokio::test]
    async fn test_success_resolves_value() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper.clone());

        let value = gov.enqueue(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let stats = gov.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.rate_limit_hits, 0);
        assert!(!stats.in_backoff);
    }

    #[tokio::test]
    async fn test_backoff_doubles_until_cap_then_resets() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper.clone());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicU32::new(0));

        let gov_inner = gov.clone();
        let observed_inner = observed.clone();
        let calls_inner = calls.clone();
        let value = gov
            .enqueue(move || {
                observed_inner
                    .lock()
                    .unwrap()
                    .push(gov_inner.current_delay());
                let n = calls_inner.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 6 {
                        Err(FetchError::RateLimited { retry_after: None })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 6);
        let ms = |v: &[u64]| v.iter().map(|m| Duration::from_millis(*m)).collect::<Vec<_>>();
        assert_eq!(
            *observed.lock().unwrap(),
            ms(&[100, 200, 400, 800, 1000, 1000, 1000])
        );

        // Wait for the trailing pause after the success to be recorded.
        while sleeper.slept().len() < 7 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sleeper.slept(), ms(&[200, 400, 800, 1000, 1000, 1000, 100]));
        assert_eq!(gov.current_delay(), Duration::from_millis(100));
        assert_eq!(gov.stats().rate_limit_hits, 6);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = calls.clone();
        let err = gov
            .enqueue(move || {
                calls_inner.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::Remote {
                        status: 500,
                        message: "upstream".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GovernorError::Fetch(FetchError::Remote { status: 500, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_extends_pause() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = calls.clone();
        gov.enqueue(move || {
            let n = calls_inner.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FetchError::RateLimited {
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        // Retry-After is honoured up to the cap.
        assert_eq!(sleeper.slept()[0], Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_dropped_future_is_never_dispatched() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let dropped_calls = Arc::new(AtomicU32::new(0));

        // First request blocks the queue until released.
        let first = gov.submit(move || {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(1)
            }
        });

        let dropped_inner = dropped_calls.clone();
        let second = gov.submit(move || {
            dropped_inner.fetch_add(1, Ordering::SeqCst);
            async { Ok(2) }
        });
        drop(second);

        let third = gov.submit(|| async { Ok(3) });
        release_tx.send(()).unwrap();

        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(third.await.unwrap(), 3);
        assert_eq!(dropped_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_request_does_not_stall_the_queue() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = governor(sleeper);

        let panicking = gov.submit(|| async {
            if true {
                panic!("request blew up");
            }
            Ok(0)
        });
        let queued = gov.submit(|| async { Ok(2) });

        assert_eq!(panicking.await, Err(GovernorError::Panicked));
        assert_eq!(queued.await.unwrap(), 2);

        // Requests submitted afterwards still get a consumer.
        let later = tokio::time::timeout(Duration::from_secs(2), gov.enqueue(|| async { Ok(3) }))
            .await
            .expect("governor stalled");
        assert_eq!(later.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_expired_request_is_not_dispatched() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gov = RequestGovernor::with_sleeper(
            "expiring",
            GovernorConfig::with_delays(Duration::from_millis(10), Duration::from_millis(100))
                .with_max_queue_wait(Duration::from_millis(20)),
            sleeper,
        );
        let late_calls = Arc::new(AtomicU32::new(0));

        let slow = gov.submit(|| async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok(1u32)
        });
        let late_inner = late_calls.clone();
        let late = gov.submit(move || {
            late_inner.fetch_add(1, Ordering::SeqCst);
            async { Ok(2u32) }
        });

        assert_eq!(slow.await.unwrap(), 1);
        assert!(matches!(
            late.await,
            Err(GovernorError::Expired { .. })
        ));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }
}
