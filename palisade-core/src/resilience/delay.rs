//! Suspension primitive used between retry attempts.

use async_trait::async_trait;
use std::time::Duration;

/// Suspends the calling task for a delay.
///
/// The retry policy never sleeps directly; it awaits a `Sleeper`, so the
/// delay can be driven by tokio's timer, a paused test clock, or a recorder.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration` before returning.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }
    }
}
