//! Retry pattern with configurable backoff strategies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palisade_core::resilience::{BackoffStrategy, RetryConfig, RetryPolicy};
//!
//! let retry = RetryPolicy::new(
//!     RetryConfig::new(4)
//!         .backoff(BackoffStrategy::power(2.0))
//!         .handle(|e: &ApiError| e.is_transient())
//!         .on_retry(|err, delay, attempt| tracing::info!(%err, ?delay, attempt, "retrying")),
//! )?;
//!
//! let body = retry.execute(|| client.fetch("https://api.example.com")).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::BackoffStrategy;
use super::delay::{Sleeper, TokioSleeper};
use super::hooks::{self, ErrorPredicate, RetryHook};
use crate::error::{ConfigError, PolicyError};

/// Retry configuration.
pub struct RetryConfig<E> {
    /// Name of the policy (for logging).
    pub name: String,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Predicate deciding whether a failure is retried.
    pub retryable: ErrorPredicate<E>,
    /// Hook invoked before each retry delay.
    pub on_retry: Option<RetryHook<E>>,
}

impl<E> Default for RetryConfig<E> {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            retryable: Arc::new(|_: &PolicyError<E>| true),
            on_retry: None,
        }
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            retryable: Arc::clone(&self.retryable),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> RetryConfig<E> {
    /// Create new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retry any failure matching the predicate, including failures produced
    /// by inner policies (timeouts, open circuits).
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Only retry operation errors matching the predicate. Failures produced
    /// by inner policies are never retried.
    pub fn handle<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(move |error: &PolicyError<E>| match error {
            PolicyError::Operation(e) => predicate(e),
            _ => false,
        });
        self
    }

    /// Set the hook invoked before each retry delay.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PolicyError<E>, Duration, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Per-call attempt state. Lives on the caller's stack, never shared.
#[derive(Debug)]
struct RetryRun {
    attempt: u32,
    started: Instant,
}

impl RetryRun {
    fn start() -> Self {
        Self {
            attempt: 1,
            started: Instant::now(),
        }
    }
}

/// Retry executor.
pub struct RetryPolicy<E> {
    config: RetryConfig<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig<E>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the delay primitive used between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig<E> {
        &self.config
    }

    /// Execute with retry logic.
    ///
    /// Attempts run strictly one after another. A non-retryable failure is
    /// returned unchanged; running out of attempts yields
    /// [`PolicyError::RetryExhausted`] wrapping the last failure.
    pub async fn execute<T, R, F, Fut>(&self, mut op: F) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, R>>,
        R: Into<PolicyError<E>>,
    {
        let mut run = RetryRun::start();

        loop {
            let error: PolicyError<E> = match op().await {
                Ok(result) => {
                    if run.attempt > 1 {
                        debug!(
                            name = %self.config.name,
                            attempt = run.attempt,
                            elapsed = ?run.started.elapsed(),
                            "Retry succeeded"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e.into(),
            };

            if !(self.config.retryable)(&error) {
                debug!(
                    name = %self.config.name,
                    attempt = run.attempt,
                    kind = %error.kind(),
                    "Failure is not retryable"
                );
                return Err(error);
            }

            if run.attempt >= self.config.max_attempts {
                warn!(
                    name = %self.config.name,
                    attempts = run.attempt,
                    kind = %error.kind(),
                    elapsed = ?run.started.elapsed(),
                    "Final retry attempt failed"
                );
                return Err(PolicyError::RetryExhausted {
                    attempts: run.attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.config.backoff.delay_for_attempt(run.attempt);
            debug!(
                name = %self.config.name,
                attempt = run.attempt,
                delay = ?delay,
                kind = %error.kind(),
                "Retry attempt failed, waiting before retry"
            );

            if let Some(hook) = &self.config.on_retry {
                hooks::invoke(&self.config.name, "on_retry", || hook(&error, delay, run.attempt));
            }
            drop(error);

            self.sleeper.sleep(delay).await;
            run.attempt += 1;
        }
    }
}
