// Palisade - resilience policies for async Rust services
//
// This library wraps fallible async operations in retry, circuit breaker and
// timeout policies that compose by nesting.

// Re-export core functionality
pub use palisade_core::*;

// Prelude for common imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogLevel, LogOutput, LoggingError};
    pub use crate::{
        BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
        ConfigError, PolicyError, PolicyErrorKind, PolicyExecutor, PolicyResult, RetryConfig,
        RetryPolicy, Sleeper, TimeoutConfig, TimeoutPolicy, TimeoutStrategy, with_timeout,
    };
}
