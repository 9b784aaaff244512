//! Retry utilities for transient fetch and upload failures.
//!
//! Provides classification of retryable errors and exponential backoff.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use std::future::Future;
use std::time::Duration;

/// Determine whether a pipeline error is worth retrying.
///
/// Retryable errors: timeouts, rate limits (429), server errors (5xx),
/// transport failures. Non-retryable: 4xx, undecodable payloads, commits.
pub fn is_retryable(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } | PipelineError::Connection { .. } => true,
        PipelineError::Fetch {
            status_code,
            message,
            ..
        } => {
            if let Some(code) = status_code {
                return *code == 429 || (500..=599).contains(code);
            }
            message.contains("timed out") || message.contains("connect")
        }
        _ => false,
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}

/// How many times to retry a transient failure, and how long to wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_delay_ms: config.retry_delay_ms,
        }
    }

    /// Run `op`, retrying retryable errors with backoff.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && is_retryable(&e) => {
                    let delay = backoff_duration(attempt, self.base_delay_ms);
                    tracing::warn!(
                        target_key = target,
                        attempt = attempt + 1,
                        max = self.attempts,
                        "Transient failure, retrying in {:?}: {e}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
