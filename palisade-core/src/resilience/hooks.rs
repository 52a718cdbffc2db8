//! Notification hooks shared by the policies.
//!
//! Hooks are plain synchronous callbacks. They run after the policy has
//! committed the transition they report, so a misbehaving hook cannot leave a
//! policy half-updated. A panic inside a hook is caught and logged.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::error::PolicyError;

/// Called before each retry delay with the failure, the delay and the attempt that failed.
pub type RetryHook<E> = Arc<dyn Fn(&PolicyError<E>, Duration, u32) + Send + Sync>;

/// Called when a circuit opens with the triggering failure and the break duration.
pub type OpenHook<E> = Arc<dyn Fn(&PolicyError<E>, Duration) + Send + Sync>;

/// Called on argument-less transitions (circuit closed, circuit half-open).
pub type TransitionHook = Arc<dyn Fn() + Send + Sync>;

/// Called when a timeout elapses with the time waited.
pub type TimeoutHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Decides whether a failure is handled by a policy.
pub type ErrorPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;

/// Run a hook, swallowing and logging any panic.
pub(crate) fn invoke<F: FnOnce()>(policy: &str, hook: &'static str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!(
            policy = %policy,
            hook,
            panic = %panic_message(payload.as_ref()),
            "Policy hook panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
