use crate::domain::classification::ErrorClassification;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters.
///
/// The delay after failed attempt `n` (1-based) is
/// `base_delay * backoff_multiplier^(n-1)`, optionally capped by `max_delay`.
/// No jitter is applied, so the delay sequence is fully determined by the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1, got {0}")]
    NoAttempts(u32),
    #[error("backoff_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, RetryPolicyError> {
        let policy = Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts < 1 {
            return Err(RetryPolicyError::NoAttempts(self.max_attempts));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RetryPolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::from_nanos(u64::MAX)
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Terminal error of a retried operation. Every variant carries the number of
/// times the operation was invoked.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The error was classified fatal; no further attempts were made.
    #[error("fatal error after {attempts} attempt(s): {error}")]
    Fatal { error: E, attempts: u32 },
    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s): {error}")]
    Exhausted { error: E, attempts: u32 },
    /// The caller cancelled the call while it was waiting to retry.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The last error returned by the operation, if any attempt ran.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Fatal { error, .. } | RetryError::Exhausted { error, .. } => Some(error),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// What happened on one failed attempt. Only lives for the duration of the
/// observer callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: String,
    pub classification: ErrorClassification,
    /// `None` when this attempt ends the call.
    pub next_delay: Option<Duration>,
}

/// Hook invoked after every failed attempt, before any backoff wait.
pub trait RetryObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);
}

impl<F> RetryObserver for F
where
    F: Fn(&AttemptRecord) + Send + Sync,
{
    fn on_attempt(&self, record: &AttemptRecord) {
        self(record)
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
///
/// The executor is domain-agnostic: the caller supplies both the operation and
/// the function that decides whether its errors are worth retrying. Cloning is
/// cheap, so one executor can be shared by every caller using the same policy.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryExecutor {
    /// Creates an executor, rejecting an invalid policy before any operation runs.
    pub fn new(policy: RetryPolicy) -> Result<Self, RetryPolicyError> {
        policy.validate()?;
        Ok(Self {
            policy,
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails fatally, or runs out of attempts.
    pub async fn execute<T, E, Op, Fut, C>(
        &self,
        operation: Op,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClassification,
        E: fmt::Display,
    {
        self.run(operation, classify, None).await
    }

    /// Like [`RetryExecutor::execute`], but a backoff wait ends early with
    /// [`RetryError::Cancelled`] once `cancel` fires.
    pub async fn execute_cancellable<T, E, Op, Fut, C>(
        &self,
        operation: Op,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClassification,
        E: fmt::Display,
    {
        self.run(operation, classify, Some(cancel)).await
    }

    async fn run<T, E, Op, Fut, C>(
        &self,
        mut operation: Op,
        classify: C,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClassification,
        E: fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let classification = classify(&error);
            let next_delay = match classification {
                ErrorClassification::Retryable if attempt < self.policy.max_attempts => {
                    Some(self.policy.delay_after(attempt))
                }
                _ => None,
            };

            if let Some(observer) = &self.observer {
                observer.on_attempt(&AttemptRecord {
                    attempt,
                    error: error.to_string(),
                    classification,
                    next_delay,
                });
            }

            let delay = match (classification, next_delay) {
                (ErrorClassification::Fatal, _) => {
                    tracing::warn!(attempt, %error, "operation failed with fatal error");
                    return Err(RetryError::Fatal {
                        error,
                        attempts: attempt,
                    });
                }
                (ErrorClassification::Retryable, None) => {
                    tracing::warn!(attempt, %error, "operation failed, retries exhausted");
                    return Err(RetryError::Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                (ErrorClassification::Retryable, Some(delay)) => delay,
            };

            tracing::debug!(attempt, ?delay, %error, "transient failure, backing off");
            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            tracing::debug!(attempt, "retry cancelled during backoff");
                            return Err(RetryError::Cancelled { attempts: attempt });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::{DependencyError, ErrorClassifier};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(base_ms), 2.0).unwrap()
    }

    fn reset() -> DependencyError {
        DependencyError::new("driver_error", "connection reset").with_code("ECONNRESET")
    }

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::driver(["ECONNRESET"])
    }

    #[test]
    fn test_default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_millis(1000));
        assert_eq!(p.backoff_multiplier, 2.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert_eq!(
            RetryPolicy::new(0, Duration::from_millis(10), 2.0),
            Err(RetryPolicyError::NoAttempts(0))
        );
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_millis(10), 0.5),
            Err(RetryPolicyError::InvalidMultiplier(_))
        ));
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_millis(10), f64::NAN),
            Err(RetryPolicyError::InvalidMultiplier(_))
        ));

        let mut p = RetryPolicy::default();
        p.max_attempts = 0;
        assert!(RetryExecutor::new(p).is_err());
    }

    #[test]
    fn test_delay_sequence() {
        let p = policy(5, 100);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped_and_never_overflows() {
        let p = policy(100, 100).with_max_delay(Duration::from_secs(1));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(10), Duration::from_secs(1));

        let uncapped = policy(100, 100);
        assert_eq!(uncapped.delay_after(5000), Duration::from_nanos(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_never_waits() {
        let executor = RetryExecutor::new(policy(3, 100)).unwrap();
        let start = Instant::now();
        let result: Result<u32, RetryError<DependencyError>> = executor
            .execute(|| async { Ok(7) }, |e| classifier().classify(e))
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_budget() {
        for n in 1..=5 {
            let executor = RetryExecutor::new(policy(n, 10)).unwrap();
            let calls = AtomicU32::new(0);
            let result: Result<(), _> = executor
                .execute(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err(reset()) }
                    },
                    |e| classifier().classify(e),
                )
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), n);
            let err = result.unwrap_err();
            assert!(err.is_exhausted());
            assert_eq!(err.attempts(), n);
            assert_eq!(err.last_error(), Some(&reset()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_never_retried() {
        let executor = RetryExecutor::new(policy(5, 10)).unwrap();
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), _> = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DependencyError::new("validation_error", "bad document")) }
                },
                |e| classifier().classify(e),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::Fatal { attempts: 1, .. })
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_twice_then_success() {
        let executor = RetryExecutor::new(policy(3, 100)).unwrap();
        let invocations = Mutex::new(Vec::new());
        let start = Instant::now();

        let result = executor
            .execute(
                || {
                    let mut seen = invocations.lock().unwrap();
                    seen.push(start.elapsed());
                    let n = seen.len();
                    async move {
                        if n < 3 { Err(reset()) } else { Ok("written") }
                    }
                },
                |e| classifier().classify(e),
            )
            .await;

        assert_eq!(result.unwrap(), "written");
        let seen = invocations.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_failed_attempt() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let executor = RetryExecutor::new(policy(3, 100))
            .unwrap()
            .with_observer(Arc::new(move |r: &AttemptRecord| {
                sink.lock().unwrap().push(r.clone());
            }));

        let _: Result<(), _> = executor
            .execute(|| async { Err(reset()) }, |e| classifier().classify(e))
            .await;

        let records = records.lock().unwrap();
        let delays: Vec<_> = records.iter().map(|r| r.next_delay).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                None,
            ]
        );
        assert!(
            records
                .iter()
                .all(|r| r.classification == ErrorClassification::Retryable)
        );
        assert_eq!(records[2].attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let executor = RetryExecutor::new(policy(5, 1000)).unwrap();
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = executor
            .execute_cancellable(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(reset()) }
                },
                |e| classifier().classify(e),
                &token,
            )
            .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_nothing() {
        let executor = RetryExecutor::new(policy(3, 10)).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<DependencyError>> = executor
            .execute_cancellable(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                |e| classifier().classify(e),
                &token,
            )
            .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
