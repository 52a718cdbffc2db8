//! Backoff strategies mapping a retry attempt number to a delay.
//!
//! Attempt numbers start at 1: `delay_for_attempt(1)` is the wait after the
//! first failed attempt. Arithmetic saturates rather than panicking on
//! overflow, so large attempt numbers yield `Duration::MAX` (or the cap).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for a caller-supplied backoff function.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Backoff strategy for retries.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: `initial + increment * (attempt - 1)`.
    Linear {
        /// Delay after the first attempt.
        initial: Duration,
        /// Increment per retry.
        increment: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: `initial * multiplier^(attempt - 1)`.
    Exponential {
        /// Delay after the first attempt.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff plus up to 50% random jitter.
    ExponentialWithJitter {
        /// Delay after the first attempt.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
    /// Power backoff: `unit * base^attempt`. With base 2 and a one second unit
    /// this waits 2s, 4s, 8s...
    Power {
        /// Base raised to the attempt number.
        base: f64,
        /// Unit the power is expressed in.
        unit: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Caller-supplied function of the attempt number.
    Custom(BackoffFn),
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear {
            initial,
            increment,
            max: Duration::MAX,
        }
    }

    /// Create exponential backoff doubling from `initial`.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::MAX,
        }
    }

    /// Create exponential backoff with jitter.
    pub fn exponential_with_jitter(initial: Duration) -> Self {
        Self::ExponentialWithJitter {
            initial,
            multiplier: 2.0,
            max: Duration::MAX,
        }
    }

    /// Create power backoff of `base^attempt` seconds.
    pub fn power(base: f64) -> Self {
        Self::Power {
            base,
            unit: Duration::from_secs(1),
            max: Duration::MAX,
        }
    }

    /// Create backoff from a function of the attempt number.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Set maximum delay.
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Linear {
                initial, increment, ..
            } => Self::Linear {
                initial,
                increment,
                max,
            },
            Self::Exponential {
                initial,
                multiplier,
                ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                ..
            } => Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            },
            Self::Power { base, unit, .. } => Self::Power { base, unit, max },
            Self::Constant(d) => Self::Constant(d.min(max)),
            Self::Custom(f) => Self::Custom(Arc::new(move |attempt| f(attempt).min(max))),
            Self::None => Self::None,
        }
    }

    /// Calculate the delay to wait after `attempt` failed (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear {
                initial,
                increment,
                max,
            } => initial
                .saturating_add(increment.saturating_mul(attempt - 1))
                .min(*max),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => scale(*initial, multiplier.powi(exponent(attempt - 1))).min(*max),
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            } => {
                let base = scale(*initial, multiplier.powi(exponent(attempt - 1)));
                let jitter = scale(base, fastrand::f64() * 0.5);
                base.saturating_add(jitter).min(*max)
            }
            Self::Power { base, unit, max } => {
                scale(*unit, base.powi(exponent(attempt))).min(*max)
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::power(2.0)
    }
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Self::Linear {
                initial,
                increment,
                max,
            } => f
                .debug_struct("Linear")
                .field("initial", initial)
                .field("increment", increment)
                .field("max", max)
                .finish(),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("ExponentialWithJitter")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::Power { base, unit, max } => f
                .debug_struct("Power")
                .field("base", base)
                .field("unit", unit)
                .field("max", max)
                .finish(),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn exponent(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Multiply a duration by a float factor, saturating on overflow.
fn scale(d: Duration, factor: f64) -> Duration {
    if !factor.is_finite() {
        return if factor > 0.0 { Duration::MAX } else { Duration::ZERO };
    }
    let nanos = d.as_nanos() as f64 * factor.max(0.0);
    if nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos.round() as u64)
    } else {
        Duration::try_from_secs_f64(nanos / 1e9).unwrap_or(Duration::MAX)
    }
}
