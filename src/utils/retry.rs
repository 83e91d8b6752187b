//! Retry utilities for store access
//!
//! The manager cannot do anything useful until the data store answers, so
//! startup retries the connection under a [`RetryPolicy`] that bounds both
//! the time spent on a single attempt and the total time spent waiting.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Time allowed for a single attempt before it counts as failed
    pub attempt_timeout: Duration,

    /// Delay between attempts
    pub delay: Duration,

    /// Give up once this much time has passed since the first attempt
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            delay: Duration::from_secs(15),
            deadline: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy
    pub fn fixed(attempt_timeout: Duration, delay: Duration, deadline: Duration) -> Self {
        Self {
            attempt_timeout,
            delay,
            deadline,
        }
    }

    /// Delay to wait before the given attempt (attempt 0 runs immediately)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Why a retried operation ultimately failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error the predicate refused to retry
    #[error("{0}")]
    Aborted(#[source] E),

    /// The deadline passed before any attempt succeeded
    #[error("gave up after {attempts} attempts over {elapsed:?}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Option<E>,
    },
}

/// Execute an operation until it succeeds, a non-retryable error occurs, or
/// the policy deadline passes
///
/// # Example
///
/// ```no_run
/// use fleetmgr::utils::retry::{with_retry_if, RetryPolicy};
/// use fleetmgr::store::{DataStore, MemoryStore};
/// use fleetmgr::utils::clock::SystemClock;
/// use std::sync::Arc;
///
/// # async fn demo() {
/// let store = MemoryStore::new(Arc::new(SystemClock));
/// let policy = RetryPolicy::default();
/// let result = with_retry_if(&policy, || store.ping(), |e| e.is_connectivity()).await;
/// # }
/// ```
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut last_error = None;
    let mut attempt = 0u32;

    loop {
        let delay = policy.calculate_delay(attempt);
        if !delay.is_zero() {
            if started.elapsed() + delay > policy.deadline {
                break;
            }
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(Ok(result)) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Ok(Err(e)) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(RetryError::Aborted(e));
                }
                warn!(attempt = attempt, error = %e, "Operation failed, will retry");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(
                    attempt = attempt,
                    timeout_ms = policy.attempt_timeout.as_millis() as u64,
                    "Operation timed out, will retry"
                );
            }
        }

        attempt += 1;
        if started.elapsed() >= policy.deadline {
            break;
        }
    }

    Err(RetryError::Exhausted {
        attempts: attempt,
        elapsed: started.elapsed(),
        last: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("permanent")]
        Permanent,
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_first_attempt() {
        let result = with_retry_if(&quick_policy(), || async { Ok::<_, TestError>(42) }, |_| true)
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry_if(
            &quick_policy(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(TestError::Transient);
                    }
                    Ok(7)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let result: Result<(), _> = with_retry_if(
            &quick_policy(),
            || async { Err(TestError::Permanent) },
            |e| matches!(e, TestError::Transient),
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted(TestError::Permanent))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_at_deadline() {
        let result: Result<(), _> =
            with_retry_if(&quick_policy(), || async { Err(TestError::Transient) }, |_| true).await;

        match result {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                // attempts at t=0,2,4,6,8,10s
                assert_eq!(attempts, 6);
                assert!(last.is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry_if(
            &quick_policy(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, TestError>("up")
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_calculate_delay() {
        let policy = quick_policy();
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(5), Duration::from_secs(2));
    }
}
