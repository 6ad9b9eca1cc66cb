//! Retry policy and the executor that applies it to a single execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    definition::{JobContext, JobDefinition},
    error::JobError,
    metrics::{Metrics, NoopMetrics},
};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Wait strategy between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait the same duration.
    Fixed(Duration),
    /// Double the wait after every failure, never exceeding `max_delay`.
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl Backoff {
    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial_delay,
                max_delay,
            } => {
                // Overflow saturates at the cap.
                2u32.checked_pow(attempt.saturating_sub(1))
                    .and_then(|factor| initial_delay.checked_mul(factor))
                    .map_or(max_delay, |delay| delay.min(max_delay))
            }
        }
    }
}

/// How many times an execution may attempt its action, and how long to wait
/// between attempts. `max_attempts == 1` means no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no waiting. The default for new definitions.
    pub fn no_retries() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Three attempts, one second apart.
    pub fn default_retries() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Backoff::Fixed(DEFAULT_RETRY_DELAY))
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(
            max_attempts,
            Backoff::Exponential {
                initial_delay,
                max_delay,
            },
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retries()
    }
}

/// Runs one execution of a job: invokes the action, retrying per the
/// definition's policy, until it succeeds, runs out of attempts, or the
/// token is cancelled.
#[derive(Clone)]
pub struct RetryExecutor {
    metrics: Arc<dyn Metrics>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetrics))
    }
}

impl RetryExecutor {
    pub fn new(metrics: Arc<dyn Metrics>) -> Self {
        Self { metrics }
    }

    /// Returns the first successful value, or the last attempt's error.
    ///
    /// Cancellation observed during an attempt or a backoff wait aborts the
    /// loop with [`JobError::Cancelled`]; it is never retried.
    pub async fn execute_with_retry<T: Send + 'static>(
        &self,
        definition: &JobDefinition<T>,
        execution: u32,
        token: &CancellationToken,
    ) -> Result<T, JobError> {
        let id = definition.id();
        let policy = definition.retry_policy();
        let mut last_error: Option<anyhow::Error> = None;
        let mut attempt = 1;

        while attempt <= policy.max_attempts {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            debug!(job_id = %id, execution, attempt, "attempt starting");
            let ctx = JobContext::new(id.clone(), execution, attempt, token.clone());
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(JobError::Cancelled),
                outcome = AssertUnwindSafe(definition.invoke(ctx)).catch_unwind() => outcome,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(panic) => anyhow::anyhow!("job action panicked: {}", panic_message(&*panic)),
            };

            // An action that bails out because it saw the token is a cancellation.
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            if attempt == policy.max_attempts {
                warn!(job_id = %id, execution, attempt, error = %err, "all attempts failed");
                last_error = Some(err);
                break;
            }

            let wait = policy.backoff.delay_for(attempt);
            warn!(
                job_id = %id,
                execution,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            last_error = Some(err);
            self.metrics.retry_scheduled(id, attempt, wait);

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }

        Err(match last_error {
            Some(err) => JobError::failed(err),
            None => JobError::failed(anyhow::anyhow!(
                "retry policy for job {id} permits no attempts"
            )),
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_job(
        fail_until: u32,
        policy: RetryPolicy,
    ) -> (JobDefinition<String>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let def = JobDefinition::new("retry-job", "RetryJob", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < fail_until {
                    anyhow::bail!("failing attempt {n}");
                }
                Ok(format!("succeeded on attempt {n}"))
            }
        })
        .with_retry_policy(policy);
        (def, calls)
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(7), Duration::from_millis(250));
    }

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        let backoff = Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(64), Duration::from_millis(1000));
    }

    #[test]
    fn presets() {
        assert_eq!(RetryPolicy::no_retries().max_attempts, 1);
        assert_eq!(RetryPolicy::default(), RetryPolicy::no_retries());
        assert_eq!(
            RetryPolicy::default_retries(),
            RetryPolicy::fixed(3, Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn success_on_first_attempt_does_not_retry() {
        let (def, calls) = counting_job(1, RetryPolicy::fixed(3, Duration::from_millis(10)));
        let value = RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, "succeeded on attempt 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_once_and_succeeds() {
        let (def, calls) = counting_job(2, RetryPolicy::fixed(3, Duration::from_millis(10)));
        let value = RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, "succeeded on attempt 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_raise_the_last_error() {
        let (def, calls) = counting_job(u32::MAX, RetryPolicy::fixed(2, Duration::from_millis(10)));
        let err = RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failing attempt 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_retries_wait_the_capped_schedule() {
        let (def, calls) = counting_job(
            4,
            RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_millis(250)),
        );
        let started = tokio::time::Instant::now();
        RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap();

        // 100 + 200 + 250 (capped)
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_attempts_is_an_invariant_violation() {
        let (def, calls) = counting_job(1, RetryPolicy::fixed(0, Duration::ZERO));
        let err = RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("permits no attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_retrying() {
        let (def, calls) = counting_job(u32::MAX, RetryPolicy::fixed(5, Duration::from_secs(30)));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = RetryExecutor::default()
            .execute_with_retry(&def, 0, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_action() {
        let def = JobDefinition::new("slow", "Slow", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = RetryExecutor::default()
            .execute_with_retry(&def, 0, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn panicking_action_counts_as_a_failure() {
        let def: JobDefinition<u8> = JobDefinition::new("panics", "Panics", |_| async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok(0)
        });
        let err = RetryExecutor::default()
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "job action panicked: boom");
    }

    #[derive(Default)]
    struct CountingMetrics {
        retries: AtomicU32,
    }

    impl Metrics for CountingMetrics {
        fn retry_scheduled(&self, _id: &cadence_core::JobId, _attempt: u32, _backoff: Duration) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn retries_are_reported_to_metrics() {
        let metrics = Arc::new(CountingMetrics::default());
        let executor = RetryExecutor::new(metrics.clone());
        let (def, _) = counting_job(3, RetryPolicy::fixed(3, Duration::from_millis(5)));
        executor
            .execute_with_retry(&def, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(metrics.retries.load(Ordering::SeqCst), 2);
    }
}
