//! Per-downstream resilience chain.
//!
//! ```text
//! call ─▶ bulkhead ─▶ breaker.allow ─▶ time limiter ─▶ remote attempt
//!            │             │                 │
//!            │             │                 └─ failure/timeout: backoff, re-check breaker, retry
//!            │             └─ open: short-circuit
//!            └─ full: short-circuit
//! any terminal failure ─▶ fallback resolver
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker::{Breaker, BreakerSnapshot, CircuitState};
use crate::bulkhead::{Bulkhead, BulkheadSnapshot};
use crate::config::ResilienceCfg;
use crate::fallback::ServiceResponse;
use crate::limiter::TimeLimiter;
use crate::outcome::{CallFailure, CallOutcome, Operation, RemoteError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceSnapshot {
    pub service: String,
    pub circuit: BreakerSnapshot,
    pub bulkhead: BulkheadSnapshot,
}

/// Breaker, bulkhead and policies for one downstream service.
///
/// Created once at startup and shared by every call to that service.
pub struct Resilience {
    service: String,
    breaker: Breaker,
    bulkhead: Bulkhead,
    retry: RetryPolicy,
    limiter: TimeLimiter,
}

impl Resilience {
    pub fn new(service: &str, cfg: &ResilienceCfg) -> Self {
        Self {
            service: service.to_owned(),
            breaker: Breaker::new(service, cfg),
            bulkhead: Bulkhead::from_cfg(service, cfg),
            retry: RetryPolicy::from_cfg(cfg),
            limiter: TimeLimiter::new(Duration::from_millis(cfg.call_timeout_ms)),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        ResilienceSnapshot {
            service: self.service.clone(),
            circuit: self.breaker.snapshot(),
            bulkhead: self.bulkhead.snapshot(),
        }
    }

    /// Runs `attempt` under the full chain, producing either its value or the
    /// reason the call gave up. `attempt` is invoked once per try.
    pub async fn execute<T, F, Fut>(&self, op: Operation, mut attempt: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        // released on every return path
        let _permit = match self.bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(full) => {
                debug!(service = %self.service, operation = %op, reason = %full, "short-circuited");
                return CallOutcome::Rejected.into_result(self.limiter.timeout());
            }
        };

        let mut budget = self.retry.budget();
        loop {
            let Some(admission) = self.breaker.allow() else {
                debug!(service = %self.service, operation = %op, attempts = budget.attempts(), "short-circuited");
                return Err(CallFailure::CircuitOpen);
            };

            budget.record_attempt();
            let outcome = self.limiter.run(attempt()).await;
            let kind = outcome.kind();
            self.breaker.record_outcome(&admission, kind);
            metrics::counter!(
                "downstream_attempts_total",
                "service" => self.service.clone(),
                "outcome" => kind.as_str()
            )
            .increment(1);

            let cause = match outcome.into_result(self.limiter.timeout()) {
                Ok(value) => return Ok(value),
                Err(cause) => cause,
            };

            if !RetryPolicy::is_retryable(kind) || !budget.has_remaining() {
                debug!(service = %self.service, operation = %op, attempts = budget.attempts(), reason = %cause, "giving up");
                return Err(match budget.attempts() {
                    1 => cause,
                    attempts => CallFailure::RetriesExhausted {
                        attempts,
                        last: Box::new(cause),
                    },
                });
            }

            let delay = budget.next_delay();
            debug!(
                service = %self.service,
                operation = %op,
                attempt = budget.attempts(),
                delay_ms = delay.as_millis() as u64,
                reason = %cause,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Like [`execute`](Self::execute) but always answers: the live response
    /// on success, `fallback(reason)` otherwise.
    pub async fn call<T, F, Fut, FB>(&self, op: Operation, attempt: F, fallback: FB) -> ServiceResponse<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ServiceResponse<T>, RemoteError>>,
        FB: FnOnce(&CallFailure) -> ServiceResponse<T>,
    {
        let started = Instant::now();
        // terminal state of the logical call
        let (response, result) = match self.execute(op, attempt).await {
            Ok(live) => (live, "succeeded"),
            Err(failure) if failure.is_short_circuit() => (fallback(&failure), "short_circuited"),
            Err(failure) => (fallback(&failure), "exhausted"),
        };

        metrics::counter!(
            "downstream_calls_total",
            "service" => self.service.clone(),
            "operation" => op.as_str(),
            "result" => result
        )
        .increment(1);
        metrics::histogram!(
            "downstream_call_latency_ms",
            "service" => self.service.clone(),
            "operation" => op.as_str()
        )
        .record(started.elapsed().as_millis() as f64);
        response
    }
}
