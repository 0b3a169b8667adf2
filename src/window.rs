use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Most recent attempt outcomes for one downstream, oldest first.
///
/// Bounded by count and, when `max_age` is set, by age as well.
#[derive(Debug)]
pub struct FailureWindow {
    capacity: usize,
    max_age: Option<Duration>,
    entries: VecDeque<(Instant, bool)>,
    failures: usize,
}

impl FailureWindow {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_age,
            entries: VecDeque::with_capacity(capacity),
            failures: 0,
        }
    }

    pub fn record(&mut self, failed: bool, now: Instant) {
        if self.entries.len() == self.capacity {
            self.pop_oldest();
        }
        self.entries.push_back((now, failed));
        if failed {
            self.failures += 1;
        }
        self.evict_expired(now);
    }

    /// Number of buffered outcomes still inside the window at `now`.
    pub fn len(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.entries.len()
    }

    pub fn failures(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failure ratio, or `None` until `min_samples` outcomes are buffered.
    pub fn failure_ratio(&mut self, min_samples: usize, now: Instant) -> Option<f64> {
        let total = self.len(now);
        if total == 0 || total < min_samples {
            return None;
        }
        Some(self.failures as f64 / total as f64)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.failures = 0;
    }

    fn evict_expired(&mut self, now: Instant) {
        let Some(max_age) = self.max_age else {
            return;
        };
        while let Some(&(at, _)) = self.entries.front() {
            if now.saturating_duration_since(at) <= max_age {
                break;
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((_, true)) = self.entries.pop_front() {
            self.failures -= 1;
        }
    }
}
