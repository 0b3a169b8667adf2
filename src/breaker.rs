use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ResilienceCfg;
use crate::outcome::OutcomeKind;
use crate::window::FailureWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Proof that the breaker let an attempt through.
///
/// Outcomes are only accepted from admissions of the current generation, so a
/// slow call admitted before a transition cannot move the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    probe: bool,
}

impl Admission {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub failure_rate: Option<f64>,
}

struct Inner {
    state: CircuitState,
    window: FailureWindow,
    generation: u64,
    opened_at: Instant,
    probe_started: Option<Instant>,
}

/// Per-downstream circuit breaker over a sliding failure window.
pub struct Breaker {
    service: String,
    min_samples: usize,
    fail_rate: f64,
    open_for: Duration,
    /// Longest a live half-open attempt can run before the time limiter cuts it off
    trial_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Breaker {
    pub fn new(service: &str, cfg: &ResilienceCfg) -> Self {
        let window_age = (cfg.cb_window_secs > 0).then(|| Duration::from_secs(cfg.cb_window_secs));
        metrics::gauge!("circuit_state", "service" => service.to_owned())
            .set(CircuitState::Closed.gauge());
        Self {
            service: service.to_owned(),
            min_samples: cfg.cb_min_samples,
            fail_rate: cfg.cb_fail_rate,
            open_for: Duration::from_millis(cfg.cb_open_ms),
            trial_timeout: Duration::from_millis(cfg.call_timeout_ms),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: FailureWindow::new(cfg.cb_window_size, window_age),
                generation: 0,
                opened_at: Instant::now(),
                probe_started: None,
            }),
        }
    }

    /// Asks to let one attempt through.
    ///
    /// Closed always admits. Open admits nothing until the cooldown elapses,
    /// then moves to HalfOpen and hands the caller the single probe slot.
    pub fn allow(&self) -> Option<Admission> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                if now.saturating_duration_since(inner.opened_at) < self.open_for {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen, now);
                inner.probe_started = Some(now);
                Some(Admission {
                    generation: inner.generation,
                    probe: true,
                })
            }
            CircuitState::HalfOpen => {
                // a probe whose caller went away is superseded after one cooldown,
                // but never while it could still be inside its attempt deadline
                let stale = inner.probe_started.is_none_or(|at| {
                    let running = now.saturating_duration_since(at);
                    running >= self.open_for && running > self.trial_timeout
                });
                if !stale {
                    return None;
                }
                inner.probe_started = Some(now);
                Some(Admission {
                    generation: inner.generation,
                    probe: true,
                })
            }
        }
    }

    pub fn record_outcome(&self, admission: &Admission, outcome: OutcomeKind) {
        if outcome == OutcomeKind::Rejected {
            return;
        }
        let now = Instant::now();
        let mut inner = self.lock();
        if admission.generation != inner.generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.window.record(outcome.is_failure(), now);
                let Some(rate) = inner.window.failure_ratio(self.min_samples, now) else {
                    return;
                };
                if rate >= self.fail_rate {
                    warn!(
                        service = %self.service,
                        failure_rate = rate,
                        threshold = self.fail_rate,
                        "failure rate over threshold"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen if admission.probe => {
                if outcome.is_failure() {
                    self.transition(&mut inner, CircuitState::Open, now);
                } else {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            buffered_calls: inner.window.len(now),
            failed_calls: inner.window.failures(now),
            failure_rate: inner.window.failure_ratio(self.min_samples, now),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.window.clear();
        inner.probe_started = None;
        if to == CircuitState::Open {
            inner.opened_at = now;
        }

        match to {
            CircuitState::Open => {
                warn!(service = %self.service, from = from.as_str(), to = to.as_str(), "circuit breaker transition")
            }
            _ => {
                info!(service = %self.service, from = from.as_str(), to = to.as_str(), "circuit breaker transition")
            }
        }
        metrics::counter!(
            "circuit_transitions_total",
            "service" => self.service.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("circuit_state", "service" => self.service.clone()).set(to.gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> Breaker {
        let cfg = ResilienceCfg {
            cb_fail_rate: 0.5,
            cb_min_samples: 10,
            cb_window_size: 10,
            cb_open_ms: 10_000,
            ..ResilienceCfg::default()
        };
        Breaker::new("test-service", &cfg)
    }

    fn trip(b: &Breaker) {
        for i in 0..10 {
            let a = b.allow().expect("closed breaker admits");
            let kind = if i < 6 { OutcomeKind::Failure } else { OutcomeKind::Success };
            b.record_outcome(&a, kind);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_min_samples() {
        let b = breaker();
        for _ in 0..9 {
            let a = b.allow().unwrap();
            b.record_outcome(&a, OutcomeKind::Failure);
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_when_failure_rate_reaches_threshold() {
        let b = breaker();
        trip(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.allow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_traffic_keeps_it_closed() {
        let b = breaker();
        for i in 0..30 {
            let a = b.allow().unwrap();
            let kind = if i % 3 == 0 { OutcomeKind::Timeout } else { OutcomeKind::Success };
            b.record_outcome(&a, kind);
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_probe() {
        let b = breaker();
        trip(&b);
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = b.allow().expect("probe after cooldown");
        assert!(probe.is_probe());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.allow().is_none());
        assert!(b.allow().is_none());

        b.record_outcome(&probe, OutcomeKind::Success);
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_restarts_cooldown() {
        let b = breaker();
        trip(&b);
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = b.allow().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        b.record_outcome(&probe, OutcomeKind::Timeout);
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(b.allow().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.allow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcomes_from_older_generation_are_ignored() {
        let b = breaker();
        let slow = b.allow().unwrap();
        trip(&b);
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = b.allow().unwrap();

        // the old call finishing cannot close the circuit
        b.record_outcome(&slow, OutcomeKind::Success);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_outcome(&probe, OutcomeKind::Failure);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_is_superseded() {
        let b = breaker();
        trip(&b);
        tokio::time::advance(Duration::from_secs(10)).await;
        let _lost = b.allow().unwrap();
        assert!(b.allow().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.allow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_half_open_call_is_not_superseded_before_its_deadline() {
        let cfg = ResilienceCfg {
            cb_min_samples: 10,
            cb_window_size: 10,
            cb_open_ms: 1_000,
            call_timeout_ms: 3_000,
            ..ResilienceCfg::default()
        };
        let b = Breaker::new("test-service", &cfg);
        trip(&b);
        tokio::time::advance(Duration::from_secs(1)).await;
        let _in_flight = b.allow().unwrap();

        tokio::time::advance(Duration::from_millis(1_200)).await;
        assert!(b.allow().is_none());
        tokio::time::advance(Duration::from_millis(1_800)).await;
        assert!(b.allow().is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.allow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_are_not_counted() {
        let b = breaker();
        for _ in 0..20 {
            let a = b.allow().unwrap();
            b.record_outcome(&a, OutcomeKind::Rejected);
        }
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.buffered_calls, 0);
    }
}
