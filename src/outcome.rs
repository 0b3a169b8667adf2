//! Call outcomes and the error taxonomy of the resilience layer.
//!
//! An attempt produces a `CallOutcome`; a logical call that does not succeed
//! ends with a `CallFailure`, which is always handed to a fallback resolver
//! and never crosses the facade as an error.

use std::{fmt, time::Duration};

use http::StatusCode;
use thiserror::Error;

/// Logical operation exposed by a resilient downstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FindAll,
    FindById,
    FindByUsername,
    Save,
    Update,
    UpdateById,
    DeleteById,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FindAll => "findAll",
            Operation::FindById => "findById",
            Operation::FindByUsername => "findByUsername",
            Operation::Save => "save",
            Operation::Update => "update",
            Operation::UpdateById => "updateById",
            Operation::DeleteById => "deleteById",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the remote call adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct RemoteError {
    pub status: StatusCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    Failure(RemoteError),
    Timeout,
    /// Bulkhead had no permit; the remote call was never made.
    Rejected,
}

/// Payload-free classification of an outcome, used for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    Rejected,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::Rejected => "rejected",
        }
    }

    /// Whether the outcome counts against the failure ratio.
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeKind::Failure | OutcomeKind::Timeout)
    }
}

impl<T> CallOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            CallOutcome::Success(_) => OutcomeKind::Success,
            CallOutcome::Failure(_) => OutcomeKind::Failure,
            CallOutcome::Timeout => OutcomeKind::Timeout,
            CallOutcome::Rejected => OutcomeKind::Rejected,
        }
    }

    /// The value, or why the attempt produced none. `deadline` is the limit a
    /// `Timeout` ran into.
    pub fn into_result(self, deadline: Duration) -> Result<T, CallFailure> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Failure(e) => Err(CallFailure::Remote(e)),
            CallOutcome::Timeout => Err(CallFailure::Timeout(deadline)),
            CallOutcome::Rejected => Err(CallFailure::BulkheadRejected),
        }
    }
}

/// Terminal reason a logical call fell back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("downstream failure: {0}")]
    Remote(RemoteError),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit-open")]
    CircuitOpen,

    #[error("bulkhead full")]
    BulkheadRejected,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<CallFailure> },
}

impl CallFailure {
    /// True when no remote call was attempted at all.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, CallFailure::CircuitOpen | CallFailure::BulkheadRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failures_and_timeouts_count_against_the_window() {
        assert!(OutcomeKind::Failure.is_failure());
        assert!(OutcomeKind::Timeout.is_failure());
        assert!(!OutcomeKind::Success.is_failure());
        assert!(!OutcomeKind::Rejected.is_failure());
    }

    #[test]
    fn exhausted_reason_carries_last_cause() {
        let f = CallFailure::RetriesExhausted {
            attempts: 3,
            last: Box::new(CallFailure::Remote(RemoteError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom",
            ))),
        };
        let msg = f.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("boom"));
        assert!(!f.is_short_circuit());
        assert!(CallFailure::CircuitOpen.is_short_circuit());
    }

    #[test]
    fn rejected_attempt_becomes_a_short_circuit() {
        let deadline = Duration::from_secs(3);
        let rejected = CallOutcome::<()>::Rejected.into_result(deadline).unwrap_err();
        assert_eq!(rejected, CallFailure::BulkheadRejected);
        assert!(rejected.is_short_circuit());

        assert_eq!(
            CallOutcome::<()>::Timeout.into_result(deadline),
            Err(CallFailure::Timeout(deadline))
        );
        assert_eq!(CallOutcome::Success(7).into_result(deadline), Ok(7));
    }
}
