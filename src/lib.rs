//! Resilient gateway in front of the user, product and favourite services.
//!
//! Each downstream call goes through a bulkhead, a circuit breaker, a time
//! limiter and a retry policy; when it cannot succeed a fallback value is
//! returned with a 503 status instead of an error.

pub mod api;
pub mod breaker;
pub mod bulkhead;
pub mod config;
pub mod fallback;
pub mod limiter;
pub mod outcome;
pub mod resilience;
pub mod retry;
pub mod services;
pub mod upstream;
pub mod window;

pub use config::Cfg;
pub use fallback::ServiceResponse;
pub use outcome::{CallFailure, CallOutcome, Operation, RemoteError};
pub use resilience::Resilience;
