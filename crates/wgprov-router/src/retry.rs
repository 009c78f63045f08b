//! Retry Executor
//!
//! Bounded retries with a per-attempt timeout and linear backoff
//! (`backoff * attempt`, not exponential). Every router call goes
//! through here; the policy values come straight from configuration.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Remote call failed after all retry attempts
#[derive(Debug, Clone, thiserror::Error)]
#[error("Router operation '{operation}' failed after {attempts} attempt(s): {last_error}")]
pub struct RemoteClientError {
    /// Operation name, for logs and audit details
    pub operation: String,
    /// Attempts actually made
    pub attempts: u32,
    /// Text of the last underlying error
    pub last_error: String,
}

/// Retry policy value object
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per call
    pub attempts: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Backoff base; attempt N sleeps `backoff * N` before N+1
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy; zero attempts is clamped to one
    pub fn new(attempts: u32, timeout: Duration, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            backoff,
        }
    }

    /// Run `call` until it succeeds or the attempt budget is spent.
    ///
    /// Each attempt is bounded by the per-attempt timeout; a timed-out
    /// attempt counts as a failure like any other.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, RemoteClientError>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", self.timeout);
                }
            }

            warn!(
                operation,
                attempt,
                max_attempts = self.attempts,
                error = %last_error,
                "Router operation attempt failed"
            );

            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(RemoteClientError {
            operation: operation.to_string(),
            attempts: self.attempts,
            last_error,
        })
    }
}
