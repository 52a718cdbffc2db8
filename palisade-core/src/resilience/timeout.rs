//! Timeout pattern for operations.
//!
//! The default strategy is **pessimistic**: the operation runs on its own
//! tokio task (or blocking thread) and the caller waits for whichever comes
//! first, the result or the deadline. On overrun the caller gets
//! [`PolicyError::Timeout`] straight away and the operation is *abandoned, not
//! killed*. It keeps running in the background and whatever it eventually
//! produces is dropped unseen. Code that must stop on timeout has to watch for
//! cancellation itself.
//!
//! The **optimistic** strategy polls the future in place and drops it at the
//! deadline, which cancels it at its next `.await`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palisade_core::resilience::{TimeoutConfig, TimeoutPolicy};
//! use std::time::Duration;
//!
//! let timeout = TimeoutPolicy::new(
//!     TimeoutConfig::new(Duration::from_secs(3))
//!         .on_timeout(|elapsed| tracing::warn!(?elapsed, "gave up")),
//! )?;
//!
//! let report = timeout.execute_blocking(|| render_report()).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, warn};

use super::hooks::{self, TimeoutHook};
use crate::error::{ConfigError, PolicyError};

/// How a timed-out operation is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutStrategy {
    /// Run the operation on its own task and abandon it on overrun.
    #[default]
    Pessimistic,
    /// Drop the operation's future at the deadline.
    Optimistic,
}

/// Timeout configuration.
#[derive(Clone)]
pub struct TimeoutConfig {
    /// Name for logging and errors.
    pub name: String,
    /// Timeout duration.
    pub duration: Duration,
    /// What happens to an overrunning operation.
    pub strategy: TimeoutStrategy,
    /// Hook invoked when the deadline elapses.
    pub on_timeout: Option<TimeoutHook>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            duration: Duration::from_secs(30),
            strategy: TimeoutStrategy::default(),
            on_timeout: None,
        }
    }
}

impl fmt::Debug for TimeoutConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutConfig")
            .field("name", &self.name)
            .field("duration", &self.duration)
            .field("strategy", &self.strategy)
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the strategy.
    pub fn strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the hook invoked when the deadline elapses.
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Timeout executor.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    /// Create a new timeout executor.
    pub fn new(config: TimeoutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create with a duration.
    pub fn with_duration(duration: Duration) -> Result<Self, ConfigError> {
        Self::new(TimeoutConfig::new(duration))
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.config.duration
    }

    /// Get the configuration.
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Execute an async operation with a deadline.
    ///
    /// The operation's own result, success or failure, is returned unchanged
    /// when it finishes in time. A panic inside the operation is resumed on
    /// the caller.
    pub async fn execute<T, E, R, F, Fut>(&self, op: F) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, R>> + Send + 'static,
        T: Send + 'static,
        R: Into<PolicyError<E>> + Send + 'static,
    {
        let started = Instant::now();

        let outcome = match self.config.strategy {
            TimeoutStrategy::Pessimistic => {
                // Dropping the JoinHandle on timeout detaches the task.
                let handle = tokio::spawn(op());
                match tokio::time::timeout(self.config.duration, handle).await {
                    Ok(joined) => Some(self.joined::<_, E>(joined, started)?),
                    Err(_) => None,
                }
            }
            TimeoutStrategy::Optimistic => {
                tokio::time::timeout(self.config.duration, op()).await.ok()
            }
        };

        match outcome {
            Some(result) => result.map_err(Into::into),
            None => Err(self.timed_out(started.elapsed())),
        }
    }

    /// Execute a blocking operation on tokio's blocking pool with a deadline.
    ///
    /// Blocking code cannot be interrupted, so both strategies abandon the
    /// thread on overrun.
    pub async fn execute_blocking<T, E, R, F>(&self, op: F) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Result<T, R> + Send + 'static,
        T: Send + 'static,
        R: Into<PolicyError<E>> + Send + 'static,
    {
        let started = Instant::now();
        let handle = tokio::task::spawn_blocking(op);

        match tokio::time::timeout(self.config.duration, handle).await {
            Ok(joined) => self.joined::<_, E>(joined, started)?.map_err(Into::into),
            Err(_) => Err(self.timed_out(started.elapsed())),
        }
    }

    fn joined<T, E>(
        &self,
        joined: Result<T, JoinError>,
        started: Instant,
    ) -> Result<T, PolicyError<E>> {
        match joined {
            Ok(result) => Ok(result),
            Err(join_error) => match join_error.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(join_error) => {
                    // Only happens when the runtime is shutting down.
                    error!(
                        name = %self.config.name,
                        error = %join_error,
                        "Timed operation was cancelled by the runtime"
                    );
                    Err(self.timed_out(started.elapsed()))
                }
            },
        }
    }

    fn timed_out<E>(&self, elapsed: Duration) -> PolicyError<E> {
        warn!(
            name = %self.config.name,
            duration = ?self.config.duration,
            elapsed = ?elapsed,
            strategy = ?self.config.strategy,
            "Operation timed out"
        );

        if let Some(hook) = &self.config.on_timeout {
            hooks::invoke(&self.config.name, "on_timeout", || hook(elapsed));
        }

        PolicyError::Timeout {
            name: self.config.name.clone(),
            elapsed,
        }
    }
}

/// Execute a fallible future with a pessimistic timeout. A zero duration
/// times out immediately.
pub async fn with_timeout<T, E, R, Fut>(duration: Duration, fut: Fut) -> Result<T, PolicyError<E>>
where
    Fut: Future<Output = Result<T, R>> + Send + 'static,
    T: Send + 'static,
    R: Into<PolicyError<E>> + Send + 'static,
{
    match TimeoutPolicy::with_duration(duration) {
        Ok(policy) => policy.execute(|| fut).await,
        Err(_) => Err(PolicyError::Timeout {
            name: "default".to_string(),
            elapsed: Duration::ZERO,
        }),
    }
}
