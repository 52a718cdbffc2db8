// Error types for the palisade policy engine

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type returned by every policy `execute`.
pub type PolicyResult<T, E> = Result<T, PolicyError<E>>;

/// Terminal failure of a policy-protected call.
///
/// Every policy returns exactly one of these per top-level `execute`, however
/// many attempts ran underneath. A raw operation error `E` converts into
/// [`PolicyError::Operation`], and a `PolicyError<E>` produced by an inner
/// policy passes through an outer one untouched, which is what lets policies
/// nest.
#[derive(Debug)]
pub enum PolicyError<E> {
    /// The operation failed and no policy intervened.
    Operation(E),
    /// Every allowed attempt failed with a retryable error.
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error observed on the final attempt.
        last: Box<PolicyError<E>>,
    },
    /// The circuit breaker rejected the call without invoking the operation.
    CircuitOpen {
        /// Circuit breaker name.
        name: String,
        /// Time left until a probe is admitted. Zero while a probe is in flight.
        remaining: Duration,
    },
    /// The deadline elapsed before the operation completed.
    Timeout {
        /// Timeout policy name.
        name: String,
        /// Wall time waited before giving up.
        elapsed: Duration,
    },
}

/// Discriminant of a [`PolicyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyErrorKind {
    Operation,
    RetryExhausted,
    CircuitOpen,
    Timeout,
}

impl fmt::Display for PolicyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation => write!(f, "operation"),
            Self::RetryExhausted => write!(f, "retry_exhausted"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl<E> PolicyError<E> {
    /// Get the error kind.
    pub fn kind(&self) -> PolicyErrorKind {
        match self {
            Self::Operation(_) => PolicyErrorKind::Operation,
            Self::RetryExhausted { .. } => PolicyErrorKind::RetryExhausted,
            Self::CircuitOpen { .. } => PolicyErrorKind::CircuitOpen,
            Self::Timeout { .. } => PolicyErrorKind::Timeout,
        }
    }

    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The innermost error, looking through any number of `RetryExhausted` layers.
    pub fn root(&self) -> &PolicyError<E> {
        match self {
            Self::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// The operation's own error, if the root failure came from the operation.
    pub fn operation_error(&self) -> Option<&E> {
        match self.root() {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Consume the error, returning the operation's own error if there is one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetryExhausted { last, .. } => last.into_operation_error(),
            _ => None,
        }
    }
}

impl<E> From<E> for PolicyError<E> {
    fn from(error: E) -> Self {
        Self::Operation(error)
    }
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "{}", e),
            Self::RetryExhausted { attempts, last } => {
                write!(f, "Retries exhausted after {} attempts: {}", attempts, last)
            }
            Self::CircuitOpen { name, remaining } => write!(
                f,
                "Circuit breaker '{}' is open, calls rejected for {:?}",
                name, remaining
            ),
            Self::Timeout { name, elapsed } => {
                write!(f, "Timeout '{}' elapsed after {:?}", name, elapsed)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display + 'static> std::error::Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RetryExhausted { last, .. } => Some(&**last),
            _ => None,
        }
    }
}

/// Invalid policy configuration, reported when a policy is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("timeout duration must be greater than zero")]
    ZeroTimeout,
}
