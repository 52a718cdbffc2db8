//! Policy executor: the canonical retry → circuit breaker → timeout stack.
//!
//! Every policy has the same `execute(op)` shape and an inner policy's
//! `PolicyError<E>` passes through an outer one untouched, so any order and
//! any depth can be built by nesting closures by hand:
//!
//! ```rust,ignore
//! // Breaker outside retry: the breaker only sees exhausted retries.
//! breaker.execute(|| retry.execute(|| call_api())).await
//! ```
//!
//! `PolicyExecutor` packages the common order, where retries see each
//! attempt's timeout and circuit-open outcome:
//!
//! ```rust,ignore
//! let executor = PolicyExecutor::builder()
//!     .retry(retry)
//!     .circuit_breaker(breaker)
//!     .timeout(timeout)
//!     .build();
//!
//! let value = executor.execute(|| call_api()).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use super::timeout::TimeoutPolicy;
use crate::error::PolicyError;

/// Runs operations through an optional retry, circuit breaker and timeout,
/// outermost first.
pub struct PolicyExecutor<E> {
    retry: Option<RetryPolicy<E>>,
    circuit_breaker: Option<Arc<CircuitBreaker<E>>>,
    timeout: Option<TimeoutPolicy>,
}

impl<E> Clone for PolicyExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            timeout: self.timeout.clone(),
        }
    }
}

impl<E> fmt::Debug for PolicyExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyExecutor")
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker.as_ref().map(|cb| cb.name()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<E> PolicyExecutor<E> {
    /// Start building an executor.
    pub fn builder() -> PolicyExecutorBuilder<E> {
        PolicyExecutorBuilder::new()
    }

    /// Get the shared circuit breaker, if one is configured.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker<E>>> {
        self.circuit_breaker.as_ref()
    }

    /// Execute an operation through every configured layer.
    ///
    /// The operation may be invoked several times (once per retry attempt), so
    /// it is `Fn` and produces a fresh future each call.
    pub async fn execute<T, R, F, Fut>(&self, op: F) -> Result<T, PolicyError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, R>> + Send + 'static,
        T: Send + 'static,
        R: Into<PolicyError<E>> + Send + 'static,
    {
        match &self.retry {
            Some(retry) => retry.execute(|| self.attempt(&op)).await,
            None => self.attempt(&op).await,
        }
    }

    async fn attempt<T, R, F, Fut>(&self, op: &F) -> Result<T, PolicyError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, R>> + Send + 'static,
        T: Send + 'static,
        R: Into<PolicyError<E>> + Send + 'static,
    {
        match &self.circuit_breaker {
            Some(breaker) => breaker.execute(|| self.guarded(op)).await,
            None => self.guarded(op).await,
        }
    }

    async fn guarded<T, R, F, Fut>(&self, op: &F) -> Result<T, PolicyError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, R>> + Send + 'static,
        T: Send + 'static,
        R: Into<PolicyError<E>> + Send + 'static,
    {
        match &self.timeout {
            Some(timeout) => timeout.execute(op).await,
            None => op().await.map_err(Into::into),
        }
    }
}

/// Builder for [`PolicyExecutor`].
pub struct PolicyExecutorBuilder<E> {
    retry: Option<RetryPolicy<E>>,
    circuit_breaker: Option<Arc<CircuitBreaker<E>>>,
    timeout: Option<TimeoutPolicy>,
}

impl<E> PolicyExecutorBuilder<E> {
    /// Create an empty builder. An executor with no layers just runs the operation.
    pub fn new() -> Self {
        Self {
            retry: None,
            circuit_breaker: None,
            timeout: None,
        }
    }

    /// Add the outer retry layer.
    pub fn retry(mut self, retry: RetryPolicy<E>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Add the circuit breaker layer. The breaker may be shared with other executors.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker<E>>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Add the inner timeout layer.
    pub fn timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the executor. Layers left unset are skipped.
    pub fn build(self) -> PolicyExecutor<E> {
        PolicyExecutor {
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
            timeout: self.timeout,
        }
    }
}

impl<E> Default for PolicyExecutorBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
