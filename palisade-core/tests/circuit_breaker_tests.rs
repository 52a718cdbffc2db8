//! Integration tests for the circuit breaker

use palisade_core::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, oneshot};
use tokio::time::advance;

const BREAK: Duration = Duration::from_secs(5);

fn breaker(threshold: u32) -> Arc<CircuitBreaker<&'static str>> {
    CircuitBreaker::new(
        CircuitBreakerConfig::new("database")
            .failure_threshold(threshold)
            .break_duration(BREAK),
    )
    .unwrap()
}

async fn fail(cb: &CircuitBreaker<&'static str>) -> PolicyError<&'static str> {
    cb.execute(|| async { Err::<(), _>("connection refused") })
        .await
        .unwrap_err()
}

async fn succeed(cb: &CircuitBreaker<&'static str>) -> Result<u32, PolicyError<&'static str>> {
    cb.execute(|| async { Ok::<_, &str>(1) }).await
}

#[tokio::test(start_paused = true)]
async fn test_trips_after_threshold_consecutive_failures() {
    let cb = breaker(2);

    assert!(fail(&cb).await.is_operation());
    assert_eq!(cb.state(), CircuitState::Closed);

    assert!(fail(&cb).await.is_operation());
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_without_invoking() {
    let cb = breaker(1);
    fail(&cb).await;

    advance(Duration::from_secs(2)).await;

    let invoked = AtomicU32::new(0);
    let result = cb
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(()) }
        })
        .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    match result {
        Err(PolicyError::CircuitOpen { name, remaining }) => {
            assert_eq!(name, "database");
            assert_eq!(remaining, Duration::from_secs(3));
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_after_break() {
    let cb = breaker(1);
    fail(&cb).await;

    advance(BREAK - Duration::from_millis(1)).await;
    assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

    advance(Duration::from_millis(1)).await;
    // State is a plain read: still Open until a call arrives.
    assert_eq!(cb.state(), CircuitState::Open);

    let invoked = AtomicU32::new(0);
    let result = cb
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(7) }
        })
        .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_for_full_break() {
    let cb = breaker(3);
    for _ in 0..3 {
        fail(&cb).await;
    }

    advance(BREAK).await;
    assert!(fail(&cb).await.is_operation());
    assert_eq!(cb.state(), CircuitState::Open);

    match succeed(&cb).await {
        Err(PolicyError::CircuitOpen { remaining, .. }) => assert_eq!(remaining, BREAK),
        other => panic!("expected CircuitOpen, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_failure_count() {
    let cb = breaker(2);
    fail(&cb).await;
    fail(&cb).await;

    advance(BREAK).await;
    succeed(&cb).await.unwrap();

    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.consecutive_failures(), 0);

    fail(&cb).await;
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.consecutive_failures(), 1);
}

#[tokio::test]
async fn test_alternating_outcomes_never_trip() {
    let cb = breaker(2);

    for _ in 0..10 {
        fail(&cb).await;
        succeed(&cb).await.unwrap();
    }

    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.total_rejections(), 0);
}

#[tokio::test]
async fn test_concurrent_failures_open_once() {
    let opened = Arc::new(AtomicU32::new(0));
    let counter = opened.clone();
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("shared")
            .failure_threshold(3)
            .break_duration(Duration::from_secs(60))
            .on_open(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    )
    .unwrap();

    let callers = 16;
    let barrier = Arc::new(Barrier::new(callers));
    let mut handles = Vec::new();
    for _ in 0..callers {
        let cb = cb.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            cb.execute(|| async move {
                barrier.wait().await;
                Err::<(), _>("overloaded")
            })
            .await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_single_probe_admitted() {
    let cb = breaker(1);
    fail(&cb).await;
    advance(BREAK).await;

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let probe = {
        let cb = cb.clone();
        tokio::spawn(async move {
            cb.execute(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, &str>("probe")
            })
            .await
        })
    };

    started_rx.await.unwrap();
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    let invoked = AtomicU32::new(0);
    let concurrent = cb
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>("second") }
        })
        .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    match concurrent {
        Err(PolicyError::CircuitOpen { remaining, .. }) => assert_eq!(remaining, Duration::ZERO),
        other => panic!("expected CircuitOpen, got {:?}", other),
    }

    release_tx.send(()).unwrap();
    assert_eq!(probe.await.unwrap().unwrap(), "probe");
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_probe_releases_slot() {
    let cb = breaker(1);
    fail(&cb).await;
    advance(BREAK).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        cb.execute(|| std::future::pending::<Result<(), &'static str>>()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    assert_eq!(succeed(&cb).await.unwrap(), 1);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_hooks_fire_in_transition_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (on_open, on_half_open, on_close) = (events.clone(), events.clone(), events.clone());

    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("orders")
            .failure_threshold(2)
            .break_duration(BREAK)
            .on_open(move |err, wait| {
                on_open.lock().push(format!("open:{}:{}s", err, wait.as_secs()));
            })
            .on_half_open(move || on_half_open.lock().push("half_open".to_string()))
            .on_close(move || on_close.lock().push("close".to_string())),
    )
    .unwrap();

    fail(&cb).await;
    fail(&cb).await;
    advance(BREAK).await;
    fail(&cb).await;
    advance(BREAK).await;
    succeed(&cb).await.unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "open:connection refused:5s".to_string(),
            "half_open".to_string(),
            "open:connection refused:5s".to_string(),
            "half_open".to_string(),
            "close".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_uncounted_errors_leave_state_unchanged() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("selective")
            .failure_threshold(2)
            .count_if(|e| e.operation_error() != Some(&"not found")),
    )
    .unwrap();

    fail(&cb).await;
    assert_eq!(cb.consecutive_failures(), 1);

    let _: Result<(), _> = cb.execute(|| async { Err("not found") }).await;
    assert_eq!(cb.consecutive_failures(), 1);
    assert_eq!(cb.state(), CircuitState::Closed);

    fail(&cb).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn test_stats_snapshot_serializes() {
    let cb = breaker(1);
    succeed(&cb).await.unwrap();
    fail(&cb).await;
    let _ = succeed(&cb).await;

    let stats = cb.stats();
    let json = serde_json::to_value(&stats).unwrap();

    assert_eq!(json["name"], "database");
    assert_eq!(json["state"], "open");
    assert_eq!(json["total_requests"], 3);
    assert_eq!(json["total_successes"], 1);
    assert_eq!(json["total_failures"], 1);
    assert_eq!(json["total_rejections"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_break_rejects_until_reset() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("forever")
            .failure_threshold(1)
            .break_duration(Duration::MAX),
    )
    .unwrap();
    fail(&cb).await;

    advance(Duration::from_secs(3600)).await;

    match succeed(&cb).await {
        Err(PolicyError::CircuitOpen { remaining, .. }) => {
            assert_eq!(remaining, Duration::MAX - Duration::from_secs(3600));
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }

    cb.reset();
    assert_eq!(succeed(&cb).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_force_open_with_huge_break_rejects() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("maintenance")
            .break_duration(Duration::from_secs(u64::MAX / 2)),
    )
    .unwrap();

    cb.force_open();

    assert!(succeed(&cb).await.unwrap_err().is_circuit_open());
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_open_hook_keeps_circuit_open() {
    let cb = CircuitBreaker::new(
        CircuitBreakerConfig::<&str>::new("fragile")
            .failure_threshold(1)
            .break_duration(BREAK)
            .on_open(|_, _| panic!("alerting backend down")),
    )
    .unwrap();

    assert!(fail(&cb).await.is_operation());
    assert_eq!(cb.state(), CircuitState::Open);

    let invoked = AtomicU32::new(0);
    let result = cb
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(()) }
        })
        .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(result.unwrap_err().is_circuit_open());

    advance(BREAK).await;
    assert_eq!(succeed(&cb).await.unwrap(), 1);
    assert_eq!(cb.state(), CircuitState::Closed);
}
