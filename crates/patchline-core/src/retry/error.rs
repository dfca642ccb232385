//! Error type returned by the retry loop

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Why a retried operation stopped without succeeding
#[derive(Debug)]
pub enum RetryError<E> {
    /// The attempt budget ran out; `source` is the final attempt's error
    Exhausted {
        attempts: u32,
        source: E,
        total_duration: Duration,
    },

    /// The cancel flag fired before or between attempts
    Cancelled { attempts: u32, last_error: Option<E> },

    /// The predicate refused to retry this error
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn exhausted(attempts: u32, source: E, total_duration: Duration) -> Self {
        RetryError::Exhausted {
            attempts,
            source,
            total_duration,
        }
    }

    pub fn cancelled(attempts: u32, last_error: Option<E>) -> Self {
        RetryError::Cancelled {
            attempts,
            last_error,
        }
    }

    pub fn non_retryable(source: E) -> Self {
        RetryError::NonRetryable(source)
    }

    fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable(source) => Some(source),
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                source,
                total_duration,
            } => write!(
                f,
                "gave up after {} attempts in {:.2}s: {}",
                attempts,
                total_duration.as_secs_f64(),
                source
            ),
            RetryError::Cancelled { attempts, last_error } => {
                write!(f, "cancelled after {} attempts", attempts)?;
                match last_error {
                    Some(err) => write!(f, ": {}", err),
                    None => Ok(()),
                }
            }
            RetryError::NonRetryable(source) => write!(f, "not retried: {}", source),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.last_error().map(|e| e as &(dyn Error + 'static))
    }
}
