//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker prevents cascade failures by counting consecutive
//! failures of a protected call path and "opening" the circuit to reject
//! calls once a threshold is reached.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Circuit is tripped, calls are rejected without running
//! - **Half-Open**: A single probe call tests whether the path recovered
//!
//! ```text
//! Closed   --failure_threshold consecutive failures-->  Open
//! Open     --break_duration elapsed, next call------->  HalfOpen
//! HalfOpen --probe succeeds-------------------------->  Closed
//! HalfOpen --probe fails----------------------------->  Open
//! ```
//!
//! Every admission decision and every transition happens under one mutex, so
//! concurrent callers never both act on a stale state. Hooks fire after the
//! lock is released, exactly once per transition.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palisade_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("database")
//!         .failure_threshold(2)
//!         .break_duration(Duration::from_secs(5))
//!         .on_open(|err, wait| tracing::warn!(%err, ?wait, "circuit opened")),
//! )?;
//!
//! match breaker.execute(|| db.connect()).await {
//!     Ok(conn) => use_connection(conn),
//!     Err(PolicyError::CircuitOpen { remaining, .. }) => back_off(remaining),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::hooks::{self, ErrorPredicate, OpenHook, TransitionHook};
use crate::error::{ConfigError, PolicyError};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is half-open, a probe is testing recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
pub struct CircuitBreakerConfig<E> {
    /// Name of the circuit breaker (for logging and errors).
    pub name: String,
    /// Number of consecutive failures that opens the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub break_duration: Duration,
    /// Predicate deciding whether a failure counts against the circuit.
    /// Failures it rejects pass through without touching the state.
    pub counts_as_failure: ErrorPredicate<E>,
    /// Hook invoked when the circuit opens.
    pub on_open: Option<OpenHook<E>>,
    /// Hook invoked when the circuit closes.
    pub on_close: Option<TransitionHook>,
    /// Hook invoked when the circuit goes half-open.
    pub on_half_open: Option<TransitionHook>,
}

impl<E> Default for CircuitBreakerConfig<E> {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
            counts_as_failure: Arc::new(|_: &PolicyError<E>| true),
            on_open: None,
            on_close: None,
            on_half_open: None,
        }
    }
}

impl<E> Clone for CircuitBreakerConfig<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            failure_threshold: self.failure_threshold,
            break_duration: self.break_duration,
            counts_as_failure: Arc::clone(&self.counts_as_failure),
            on_open: self.on_open.clone(),
            on_close: self.on_close.clone(),
            on_half_open: self.on_half_open.clone(),
        }
    }
}

impl<E> fmt::Debug for CircuitBreakerConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("break_duration", &self.break_duration)
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> CircuitBreakerConfig<E> {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the break duration.
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Only count failures matching the predicate.
    pub fn count_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.counts_as_failure = Arc::new(predicate);
        self
    }

    /// Set the hook invoked when the circuit opens.
    pub fn on_open<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PolicyError<E>, Duration) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Set the hook invoked when the circuit closes.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Set the hook invoked when the circuit goes half-open.
    pub fn on_half_open<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_half_open = Some(Arc::new(hook));
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

/// Internal circuit breaker state. Only touched under the breaker's mutex.
#[derive(Debug)]
struct CircuitBreakerState {
    status: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every transition; outcomes admitted under an older
    /// generation are stale and ignored.
    generation: u64,
}

impl CircuitBreakerState {
    fn open(&mut self, now: Instant) {
        self.status = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
        self.generation += 1;
    }

    fn close(&mut self) {
        self.status = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
        self.generation += 1;
    }
}

/// Transition performed inside the critical section, reported after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Opened { failures: u32 },
    HalfOpened,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Closed,
    Probe,
}

/// Admission ticket for one call. Dropping an unfinished probe releases the
/// probe slot so the breaker cannot wedge in half-open.
struct Permit<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    kind: PermitKind,
    generation: u64,
    finished: bool,
}

impl<E> Permit<'_, E> {
    fn success(mut self) {
        self.finished = true;
        self.breaker.on_success(self.kind, self.generation);
    }

    fn failure(mut self, error: &PolicyError<E>) {
        self.finished = true;
        if (self.breaker.config.counts_as_failure)(error) {
            self.breaker.on_failure(self.kind, self.generation, error);
        } else {
            self.breaker.on_ignored(self.kind, self.generation);
        }
    }
}

impl<E> Drop for Permit<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.on_ignored(self.kind, self.generation);
        }
    }
}

/// Circuit breaker for protecting against cascade failures.
///
/// One instance is shared (through `Arc`) by every caller of a protected path.
pub struct CircuitBreaker<E> {
    config: CircuitBreakerConfig<E>,
    inner: Mutex<CircuitBreakerState>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl<E> CircuitBreaker<E> {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig<E>) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            break_duration = ?config.break_duration,
            "Circuit breaker initialized"
        );

        Ok(Arc::new(Self {
            config,
            inner: Mutex::new(CircuitBreakerState {
                status: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }))
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig<E> {
        &self.config
    }

    /// Get the current circuit state.
    ///
    /// This is a plain read: an open circuit whose break has elapsed still
    /// reports `Open` until a call arrives and moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().status
    }

    /// Get the current count of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// When the circuit is open the operation is not invoked and
    /// [`PolicyError::CircuitOpen`] is returned.
    pub async fn execute<T, R, F, Fut>(&self, op: F) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, R>>,
        R: Into<PolicyError<E>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(remaining) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(
                    name = %self.config.name,
                    remaining = ?remaining,
                    "Circuit breaker rejected call"
                );
                return Err(PolicyError::CircuitOpen {
                    name: self.config.name.clone(),
                    remaining,
                });
            }
        };

        match op().await {
            Ok(result) => {
                permit.success();
                Ok(result)
            }
            Err(e) => {
                let error = e.into();
                permit.failure(&error);
                Err(error)
            }
        }
    }

    /// Decide whether a call may run. Returns the time left on the break when
    /// it may not.
    fn acquire(&self) -> Result<Permit<'_, E>, Duration> {
        let (kind, generation, transition) = {
            let mut inner = self.inner.lock();
            match inner.status {
                CircuitState::Closed => (PermitKind::Closed, inner.generation, None),
                CircuitState::Open => {
                    let now = Instant::now();
                    let elapsed = inner
                        .opened_at
                        .map_or(Duration::ZERO, |opened_at| now.saturating_duration_since(opened_at));
                    if elapsed < self.config.break_duration {
                        return Err(self.config.break_duration - elapsed);
                    }
                    inner.status = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.generation += 1;
                    (PermitKind::Probe, inner.generation, Some(Transition::HalfOpened))
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(Duration::ZERO);
                    }
                    inner.probe_in_flight = true;
                    (PermitKind::Probe, inner.generation, None)
                }
            }
        };

        if let Some(transition) = transition {
            self.notify(transition, None);
        }

        Ok(Permit {
            breaker: self,
            kind,
            generation,
            finished: false,
        })
    }

    fn on_success(&self, kind: PermitKind, generation: u64) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(name = %self.config.name, "Ignoring stale success");
                return;
            }
            match kind {
                PermitKind::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                PermitKind::Probe => {
                    inner.close();
                    Some(Transition::Closed)
                }
            }
        };

        if let Some(transition) = transition {
            self.notify(transition, None);
        }
    }

    fn on_failure(&self, kind: PermitKind, generation: u64, error: &PolicyError<E>) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(name = %self.config.name, "Ignoring stale failure");
                return;
            }
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            let failures = inner.consecutive_failures;
            let trips = match kind {
                PermitKind::Closed => failures >= self.config.failure_threshold,
                PermitKind::Probe => true,
            };
            if trips {
                inner.open(Instant::now());
                Some(Transition::Opened { failures })
            } else {
                None
            }
        };

        if let Some(transition) = transition {
            self.notify(transition, Some(error));
        }
    }

    /// A call finished without an outcome that counts (unhandled error or
    /// dropped future). Only a probe needs releasing.
    fn on_ignored(&self, kind: PermitKind, generation: u64) {
        if kind != PermitKind::Probe {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.status == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn notify(&self, transition: Transition, error: Option<&PolicyError<E>>) {
        let name = &self.config.name;
        match transition {
            Transition::Opened { failures } => {
                warn!(
                    name = %name,
                    failures,
                    break_duration = ?self.config.break_duration,
                    "Circuit breaker OPENED"
                );
                if let (Some(hook), Some(error)) = (&self.config.on_open, error) {
                    hooks::invoke(name, "on_open", || hook(error, self.config.break_duration));
                }
            }
            Transition::HalfOpened => {
                debug!(name = %name, "Circuit breaker transitioning to HALF-OPEN");
                if let Some(hook) = &self.config.on_half_open {
                    hooks::invoke(name, "on_half_open", || hook());
                }
            }
            Transition::Closed => {
                info!(name = %name, "Circuit breaker CLOSED");
                if let Some(hook) = &self.config.on_close {
                    hooks::invoke(name, "on_close", || hook());
                }
            }
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.status != CircuitState::Closed;
            inner.close();
            changed
        };
        if changed {
            self.notify(Transition::Closed, None);
        }
    }

    /// Manually force the circuit open for one break duration.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.open(Instant::now());
        warn!(name = %self.config.name, "Circuit breaker forced OPEN");
    }

    // Metrics

    /// Get total calls attempted, including rejected ones.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get total successful calls.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Get total counted failures.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total rejected calls (circuit open).
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let (state, consecutive_failures) = {
            let inner = self.inner.lock();
            (inner.status, inner.consecutive_failures)
        };
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state,
            consecutive_failures,
            total_requests: self.total_requests(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
    /// Total calls.
    pub total_requests: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total counted failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
}

impl CircuitBreakerStats {
    /// Calculate success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }

    /// Calculate failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }
}
