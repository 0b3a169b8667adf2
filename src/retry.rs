//! Bounded retries with capped exponential backoff.

use std::time::Duration;

use crate::config::ResilienceCfg;
use crate::outcome::OutcomeKind;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    multiplier: f64,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            multiplier: multiplier.max(1.0),
            cap: cap.max(base),
        }
    }

    pub fn from_cfg(cfg: &ResilienceCfg) -> Self {
        Self::new(
            cfg.retry_max_attempts,
            Duration::from_millis(cfg.retry_base_ms),
            cfg.retry_multiplier,
            Duration::from_millis(cfg.retry_max_delay_ms),
        )
    }

    /// Fresh budget for one logical call.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            attempts: 0,
            max_attempts: self.max_attempts,
            next_delay: self.base,
            multiplier: self.multiplier,
            cap: self.cap,
        }
    }

    /// Circuit-open and bulkhead rejections end the call; everything else
    /// that is not a success may be tried again.
    pub fn is_retryable(outcome: OutcomeKind) -> bool {
        outcome.is_failure()
    }
}

/// Attempts used so far by one logical call and the delay before the next.
#[derive(Debug)]
pub struct RetryBudget {
    attempts: u32,
    max_attempts: u32,
    next_delay: Duration,
    multiplier: f64,
    cap: Duration,
}

impl RetryBudget {
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay to wait before the next attempt; never shrinks between calls.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_delay.min(self.cap);
        let grown = (self.next_delay.as_nanos() as f64 * self.multiplier).round();
        self.next_delay = Duration::from_nanos(grown.min(self.cap.as_nanos() as f64) as u64);
        delay
    }
}
