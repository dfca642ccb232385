//! Retry execution engine
//!
//! Drives an async operation through a `RetryPolicy`, consulting a predicate
//! and reporting to an observer, with optional cooperative cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use crate::cancel::CancelFlag;
use crate::types::RetryPolicy;

use super::error::RetryError;
use super::observer::{NoOpObserver, RetryObserver};
use super::strategies::{calculate_delay, AlwaysRetry, RetryPredicate};

/// A retry executor with configurable policy, predicate, observer and
/// cancellation flag
///
/// ```rust
/// use patchline_core::retry::{RetryExecutor, TracingObserver};
/// use patchline_core::types::RetryPolicy;
/// use patchline_core::CancelFlag;
///
/// let executor = RetryExecutor::new(RetryPolicy::default())
///     .with_observer(TracingObserver::new("download"))
///     .with_cancel(CancelFlag::new())
///     .with_jitter(false);
/// ```
pub struct RetryExecutor<P = AlwaysRetry, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
    cancel: Option<CancelFlag>,
}

impl RetryExecutor<AlwaysRetry, NoOpObserver> {
    /// Create an executor that retries every error, with jitter enabled
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: AlwaysRetry,
            observer: NoOpObserver,
            jitter: true,
            cancel: None,
        }
    }
}

impl<P, O> RetryExecutor<P, O> {
    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutor<P2, O> {
        RetryExecutor {
            policy: self.policy,
            predicate,
            observer: self.observer,
            jitter: self.jitter,
            cancel: self.cancel,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutor<P, O2> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            jitter: self.jitter,
            cancel: self.cancel,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Stop retrying once `cancel` is triggered
    ///
    /// The flag is checked before every attempt, and a pending backoff sleep
    /// is interrupted as soon as it fires. An attempt already in flight is not
    /// interrupted by the executor; the operation observes the flag itself.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attempt budget for this executor, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

impl<P, O> RetryExecutor<P, O>
where
    O: RetryObserver,
{
    /// Execute an operation with retry logic
    ///
    /// Returns the first successful result, or the `RetryError` describing why
    /// the loop stopped.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + Send + 'static,
        P: RetryPredicate<E>,
    {
        let start = Instant::now();
        let max_attempts = self.max_attempts();
        let mut last_error: Option<E> = None;
        let mut attempt = 0;

        loop {
            if self.is_cancelled() {
                self.observer.on_cancelled(attempt);
                return Err(RetryError::cancelled(attempt, last_error));
            }

            attempt += 1;
            self.observer.on_attempt_start(attempt, max_attempts);

            let err = match op().await {
                Ok(result) => {
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_non_retryable(attempt, &err);
                return Err(RetryError::non_retryable(err));
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(attempt, &err);
                return Err(RetryError::exhausted(attempt, err, start.elapsed()));
            }

            let delay = calculate_delay(&self.policy, attempt, self.jitter);
            self.observer.on_attempt_failed(attempt, &err, delay);
            last_error = Some(err);

            if delay.is_zero() {
                continue;
            }

            match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
