//! Integration tests for composing policies.
//!
//! These tests verify that policies nest in either order and that the
//! executor applies retry, circuit breaker and timeout outermost first.

use palisade::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq)]
struct Unavailable;

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service unavailable")
    }
}

fn immediate_retry(max_attempts: u32) -> RetryPolicy<Unavailable> {
    RetryPolicy::new(RetryConfig::new(max_attempts).backoff(BackoffStrategy::None)).unwrap()
}

fn breaker(threshold: u32) -> Arc<CircuitBreaker<Unavailable>> {
    CircuitBreaker::new(
        CircuitBreakerConfig::new("upstream")
            .failure_threshold(threshold)
            .break_duration(Duration::from_secs(60)),
    )
    .unwrap()
}

// =============================================================================
// Manual Nesting
// =============================================================================

#[tokio::test]
async fn test_breaker_inside_retry_counts_every_attempt() {
    let retry = immediate_retry(5);
    let cb = breaker(2);
    let invocations = AtomicU32::new(0);

    let result: Result<(), _> = retry
        .execute(|| {
            cb.execute(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Err(Unavailable) }
            })
        })
        .await;

    // Two attempts reach the operation, the remaining three are rejected.
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.total_rejections(), 3);

    match result.unwrap_err() {
        PolicyError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 5);
            assert!(last.is_circuit_open());
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_inside_breaker_counts_exhausted_runs() {
    let retry = immediate_retry(3);
    let cb = breaker(2);
    let invocations = AtomicU32::new(0);

    for _ in 0..2 {
        let result: Result<(), _> = cb
            .execute(|| {
                retry.execute(|| {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    async { Err(Unavailable) }
                })
            })
            .await;
        assert!(result.unwrap_err().is_retry_exhausted());
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 6);
    assert_eq!(cb.state(), CircuitState::Open);

    let rejected: Result<(), _> = cb
        .execute(|| {
            retry.execute(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Err(Unavailable) }
            })
        })
        .await;

    assert!(rejected.unwrap_err().is_circuit_open());
    assert_eq!(invocations.load(Ordering::SeqCst), 6);
}

// =============================================================================
// Policy Executor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_executor_full_stack_trips_on_timeouts() {
    let cb = breaker(2);
    let executor = PolicyExecutor::builder()
        .retry(
            RetryPolicy::new(
                RetryConfig::new(4).backoff(BackoffStrategy::constant(Duration::from_millis(100))),
            )
            .unwrap(),
        )
        .circuit_breaker(cb.clone())
        .timeout(TimeoutPolicy::with_duration(Duration::from_millis(50)).unwrap())
        .build();
    let invocations = Arc::new(AtomicU32::new(0));

    let result: Result<(), _> = executor
        .execute(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err(Unavailable)
            }
        })
        .await;

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.total_failures(), 2);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), PolicyErrorKind::RetryExhausted);
    assert!(err.root().is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn test_executor_recovers_from_transient_failures() {
    let cb = breaker(5);
    let executor = PolicyExecutor::builder()
        .retry(immediate_retry(3))
        .circuit_breaker(cb.clone())
        .timeout(TimeoutPolicy::with_duration(Duration::from_secs(1)).unwrap())
        .build();
    let invocations = Arc::new(AtomicU32::new(0));

    let result = executor
        .execute(|| {
            let n = invocations.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if n < 2 { Err(Unavailable) } else { Ok("recovered") }
            }
        })
        .await;

    assert_eq!(assert_ok!(result), "recovered");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_executor_with_operation_only_retry_stops_at_open_circuit() {
    let cb = breaker(1);
    let executor = PolicyExecutor::builder()
        .retry(
            RetryPolicy::new(
                RetryConfig::new(5)
                    .backoff(BackoffStrategy::None)
                    .handle(|_: &Unavailable| true),
            )
            .unwrap(),
        )
        .circuit_breaker(cb.clone())
        .build();
    let invocations = Arc::new(AtomicU32::new(0));

    let result: Result<(), _> = executor
        .execute(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Err(Unavailable) }
        })
        .await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(result.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn test_executors_share_one_breaker() {
    let cb = breaker(2);
    let first = PolicyExecutor::builder().circuit_breaker(cb.clone()).build();
    let second = PolicyExecutor::builder().circuit_breaker(cb.clone()).build();

    let _: Result<(), _> = first.execute(|| async { Err(Unavailable) }).await;
    let _: Result<(), _> = second.execute(|| async { Err(Unavailable) }).await;

    let result = first.execute(|| async { Ok::<_, Unavailable>(1) }).await;

    assert!(assert_err!(result).is_circuit_open());
    assert!(Arc::ptr_eq(first.circuit_breaker().unwrap(), &cb));
}
