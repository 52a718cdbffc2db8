//! Resilience Scenarios Example
//!
//! Runs three scenarios against simulated dependencies:
//! - Retry of a flaky API call with `2^attempt` second backoff
//! - Circuit breaker over a failing database connection
//! - Pessimistic timeout over a slow blocking operation
//!
//! Run with: cargo run --example scenarios
//!
//! Set `PALISADE_LOG_LEVEL=debug` to see every policy decision.

use palisade::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

static API_CALL_ATTEMPTS: AtomicU32 = AtomicU32::new(0);
static DB_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Error)]
enum ServiceError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("{0}")]
    Database(String),
}

// ============================================================================
// Simulated Dependencies
// ============================================================================

async fn call_external_api(url: &str) -> Result<String, ServiceError> {
    let attempt = API_CALL_ATTEMPTS.fetch_add(1, Ordering::SeqCst) + 1;
    println!("Attempt {}: Calling {}...", attempt, url);

    if attempt <= 2 {
        return Err(ServiceError::HttpRequest("Temporary API failure".to_string()));
    }

    println!("API call successful!");
    Ok("API RESULT".to_string())
}

async fn connect_to_database() -> Result<String, ServiceError> {
    let attempt = DB_ATTEMPTS.fetch_add(1, Ordering::SeqCst) + 1;
    println!("DB attempt {}", attempt);

    if attempt <= 3 {
        return Err(ServiceError::Database("Database connection failed".to_string()));
    }

    Ok("DB Data Loaded".to_string())
}

fn long_running_operation() -> Result<(), ServiceError> {
    println!("Starting long operation...");
    std::thread::sleep(Duration::from_secs(4));
    println!("Operation completed!");
    Ok(())
}

// ============================================================================
// Scenarios
// ============================================================================

async fn retry_scenario() -> Result<(), ConfigError> {
    println!("============== SCENARIO 1: RETRY ==============");

    let retry = RetryPolicy::new(
        RetryConfig::new(4)
            .name("external-api")
            .backoff(BackoffStrategy::power(2.0))
            .handle(|e: &ServiceError| matches!(e, ServiceError::HttpRequest(_)))
            .on_retry(|err, delay, attempt| {
                println!(
                    "Retry {} after {}s due to: {}",
                    attempt,
                    delay.as_secs_f64(),
                    err
                );
            }),
    )?;

    match retry.execute(|| call_external_api("https://api.example.com")).await {
        Ok(result) => println!("Final API result: {}", result),
        Err(e) => println!("API failed after all retries: {}", e),
    }

    Ok(())
}

async fn circuit_breaker_scenario() -> Result<(), ConfigError> {
    println!("\n============== SCENARIO 2: CIRCUIT BREAKER ==============");

    let breaker = CircuitBreaker::<ServiceError>::new(
        CircuitBreakerConfig::new("database")
            .failure_threshold(2)
            .break_duration(Duration::from_secs(5))
            .on_open(|err, wait| {
                println!("Circuit opened for {}s due to: {}", wait.as_secs(), err)
            })
            .on_close(|| println!("Circuit closed"))
            .on_half_open(|| println!("Circuit half-open")),
    )?;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match breaker.execute(connect_to_database).await {
            Ok(data) => println!("DB Result: {}", data),
            Err(e) => println!("DB operation failed: {}", e),
        }
    }

    let stats = breaker.stats();
    println!(
        "Breaker '{}' is {} after {} calls ({} rejected)",
        stats.name, stats.state, stats.total_requests, stats.total_rejections
    );

    Ok(())
}

async fn timeout_scenario() -> Result<(), ConfigError> {
    println!("\n============== SCENARIO 3: TIMEOUT ==============");

    let timeout = TimeoutPolicy::new(
        TimeoutConfig::new(Duration::from_secs(3))
            .name("long-operation")
            .strategy(TimeoutStrategy::Pessimistic)
            .on_timeout(|elapsed| println!("Timeout after {}s!", elapsed.as_secs())),
    )?;

    let outcome: PolicyResult<(), ServiceError> =
        timeout.execute_blocking(long_running_operation).await;

    match outcome {
        Ok(()) => println!("Operation finished in time."),
        Err(PolicyError::Timeout { .. }) => {
            println!("Operation was abandoned due to timeout.")
        }
        Err(e) => println!("Operation failed: {}", e),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::from_env().output(LogOutput::Stderr).init()?;

    retry_scenario().await?;
    circuit_breaker_scenario().await?;
    timeout_scenario().await?;

    println!("\n============== END OF WORK ==============");
    Ok(())
}
