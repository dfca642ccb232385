//! Retry execution engine with policy-based configuration
//!
//! # Features
//!
//! - Multiple retry strategies: None, Fixed, Exponential, Linear backoff
//! - Configurable jitter for exponential backoff
//! - Predicates that decide which errors are worth another attempt
//! - Observable retry attempts via the `RetryObserver` trait
//! - Cooperative cancellation between attempts and during backoff sleeps
//!
//! # Example
//!
//! ```rust,no_run
//! use patchline_core::retry::{RetryError, RetryExecutor, TracingObserver};
//! use patchline_core::types::RetryPolicy;
//!
//! async fn example() -> Result<String, RetryError<std::io::Error>> {
//!     RetryExecutor::new(RetryPolicy::default())
//!         .with_observer(TracingObserver::new("fetch"))
//!         .execute(|| async { Ok("success".to_string()) })
//!         .await
//! }
//! ```

mod error;
mod executor;
mod observer;
mod strategies;

pub use error::RetryError;
pub use executor::RetryExecutor;
pub use observer::{NoOpObserver, RetryObserver, TracingObserver};
pub use strategies::{calculate_delay, AlwaysRetry, ClosurePredicate, RetryPredicate};
