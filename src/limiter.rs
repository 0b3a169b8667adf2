use std::time::Duration;

use crate::outcome::{CallOutcome, RemoteError};

/// Deadline for a single attempt.
///
/// The attempt future is dropped when the deadline passes, which cancels any
/// in-flight request; whatever it would have produced is discarded.
#[derive(Debug, Clone, Copy)]
pub struct TimeLimiter {
    timeout: Duration,
}

impl TimeLimiter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run<T, Fut>(&self, attempt: Fut) -> CallOutcome<T>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(value)) => CallOutcome::Success(value),
            Ok(Err(e)) => CallOutcome::Failure(e),
            Err(_) => CallOutcome::Timeout,
        }
    }
}
