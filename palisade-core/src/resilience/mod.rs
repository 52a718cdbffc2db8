//! # Resilience Policies
//!
//! Policies that wrap an async operation and decide how its failures are
//! handled.
//!
//! ## Policies Included
//!
//! - **Retry**: Re-run failed attempts with configurable backoff
//! - **Circuit Breaker**: Fail fast once a dependency keeps failing
//! - **Timeout**: Stop waiting for operations that overrun a deadline
//! - **Policy Executor**: Compose the three in a fixed order
//!
//! Every policy exposes `execute(op)` returning `Result<T, PolicyError<E>>`,
//! so policies nest inside each other's operations.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use palisade_core::resilience::*;
//! use std::time::Duration;
//!
//! // Circuit breaker that opens after 2 consecutive failures
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("inventory")
//!         .failure_threshold(2)
//!         .break_duration(Duration::from_secs(3)),
//! )?;
//!
//! let result = breaker.execute(|| async { inventory_lookup().await }).await;
//! ```

mod backoff;
mod circuit_breaker;
mod delay;
mod executor;
mod hooks;
mod retry;
mod timeout;

pub use backoff::*;
pub use circuit_breaker::*;
pub use delay::*;
pub use executor::*;
pub use hooks::{ErrorPredicate, OpenHook, RetryHook, TimeoutHook, TransitionHook};
pub use retry::*;
pub use timeout::*;
