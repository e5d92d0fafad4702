// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Time-bounded, retried, cancellable container engine calls.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::driver::DriverError;
use crate::domain::node_config::{OrchestrationConfig, RetryConfig};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestrationConfig) -> Self {
        Self {
            timeout: config.driver_timeout,
            retry: config.driver_retry.clone(),
        }
    }

    /// Runs `call` until it succeeds, fails permanently, exhausts its attempts
    /// or `cancel` fires. Every attempt is bounded by `timeout`.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let backoff = self.retry.backoff();
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                result = tokio::time::timeout(self.timeout, call()) => {
                    result.unwrap_or(Err(DriverError::Timeout(self.timeout)))
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.attempts => {
                    let delay = backoff.delay_for(attempt);
                    attempt += 1;
                    warn!(operation, attempt, ?delay, "Container engine call failed, retrying: {}", e);
                    metrics::counter!("marshal_driver_retries_total", "operation" => operation)
                        .increment(1);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StepError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(StepError::Driver(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            retry: RetryConfig {
                attempts,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy(3)
            .run("start", &CancellationToken::new(), || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DriverError::Engine("connection reset".to_string()))
                } else {
                    Ok("started")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "started");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy(5)
            .run("pull_image", &CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DriverError::ImageUnavailable("nope:1".to_string()))
            })
            .await;
        assert!(matches!(result, Err(StepError::Driver(DriverError::ImageUnavailable(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_call_times_out_after_all_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(2)
            .run("create", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                futures::future::pending()
            })
            .await;
        assert!(matches!(result, Err(StepError::Driver(DriverError::Timeout(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = policy(3)
            .run("stop", &cancel, futures::future::pending)
            .await;
        assert!(matches!(result, Err(StepError::Cancelled)));
    }
}
