//! Throttle-aware retry for outbound calls.
//!
//! A [`BackoffRetrier`] runs an operation, and when the failure is classified
//! as throttling it waits (using the error's own hint, or a default) and tries
//! again. Any other failure is returned immediately.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

type ThrottleFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type WaitHintFn<E> = Arc<dyn Fn(&E, u32) -> Option<Duration> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt was throttled; `source` is the last throttling error.
    #[error("still throttled after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// A failure that is not throttling, returned without retrying.
    #[error(transparent)]
    Failed(E),
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Failed(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Per-invocation bookkeeping, discarded when `run` returns.
#[derive(Debug, Clone, Copy, Default)]
struct RetryContext {
    attempt: u32,
    waited: Duration,
}

pub struct BackoffRetrier<E> {
    name: &'static str,
    max_attempts: u32,
    default_wait: Duration,
    is_throttled: ThrottleFn<E>,
    wait_hint: WaitHintFn<E>,
}

impl<E> Clone for BackoffRetrier<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            max_attempts: self.max_attempts,
            default_wait: self.default_wait,
            is_throttled: Arc::clone(&self.is_throttled),
            wait_hint: Arc::clone(&self.wait_hint),
        }
    }
}

impl<E> fmt::Debug for BackoffRetrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffRetrier")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("default_wait", &self.default_wait)
            .finish()
    }
}

impl<E> BackoffRetrier<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// `max_attempts` counts the first call; values below 1 are raised to 1.
    ///
    /// `wait_hint` receives the failing error and the zero-based attempt
    /// index; returning `None` falls back to `default_wait`.
    pub fn new<C, W>(
        name: &'static str,
        max_attempts: u32,
        default_wait: Duration,
        is_throttled: C,
        wait_hint: W,
    ) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
        W: Fn(&E, u32) -> Option<Duration> + Send + Sync + 'static,
    {
        Self {
            name,
            max_attempts: max_attempts.max(1),
            default_wait,
            is_throttled: Arc::new(is_throttled),
            wait_hint: Arc::new(wait_hint),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails for a non-throttling reason,
    /// or `max_attempts` throttled attempts have been made. The closure gets
    /// the zero-based attempt index.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut ctx = RetryContext::default();

        loop {
            let error = match operation(ctx.attempt).await {
                Ok(value) => {
                    if ctx.attempt > 0 {
                        debug!(
                            call_site = self.name,
                            attempts = ctx.attempt + 1,
                            waited_ms = ctx.waited.as_millis() as u64,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !(self.is_throttled)(&error) {
                return Err(RetryError::Failed(error));
            }

            let attempts = ctx.attempt + 1;
            if attempts >= self.max_attempts {
                warn!(
                    call_site = self.name,
                    attempts,
                    error = %error,
                    "Still throttled, giving up"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    source: error,
                });
            }

            let wait = (self.wait_hint)(&error, ctx.attempt).unwrap_or(self.default_wait);
            warn!(
                call_site = self.name,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                "Throttled, retrying after wait"
            );

            sleep(wait).await;
            ctx.waited += wait;
            ctx.attempt = attempts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Error, PartialEq)]
    enum FakeError {
        #[error("throttled, retry after {0:?}")]
        Throttled(Option<Duration>),
        #[error("bad request")]
        BadRequest,
    }

    fn retrier(max_attempts: u32) -> BackoffRetrier<FakeError> {
        BackoffRetrier::new(
            "fake",
            max_attempts,
            Duration::from_millis(500),
            |e: &FakeError| matches!(e, FakeError::Throttled(_)),
            |e: &FakeError, _| match e {
                FakeError::Throttled(hint) => *hint,
                _ => None,
            },
        )
    }

    fn assert_waited(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "waited {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    /// Throttles the first `k` calls, then returns the attempt index.
    async fn flaky(calls: &AtomicU32, k: u32) -> Result<u32, FakeError> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < k {
            Err(FakeError::Throttled(None))
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_throttles_then_success() {
        for k in 0..4 {
            let calls = AtomicU32::new(0);
            let start = Instant::now();

            let result = retrier(5).run(|_| flaky(&calls, k)).await;

            assert_eq!(result.unwrap(), k);
            assert_eq!(calls.load(Ordering::SeqCst), k + 1);
            assert_waited(start, Duration::from_millis(500) * k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_throttling_error() {
        let calls = AtomicU32::new(0);

        let result = retrier(3).run(|_| flaky(&calls, 3)).await;

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, FakeError::Throttled(None));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_throttling_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = retrier(5)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::BadRequest) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Failed(FakeError::BadRequest))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_waited(start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_overrides_default_wait() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = retrier(2)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(FakeError::Throttled(Some(Duration::from_secs(1))))
                    } else {
                        Ok("second")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_waited(start, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(retrier(0).max_attempts(), 1);
    }
}
