use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::config::ResilienceCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bulkhead full for {max_concurrent} concurrent calls")]
pub struct BulkheadFull {
    pub max_concurrent: usize,
}

/// Slot held for the whole logical call, retries included.
/// Dropping it returns the slot.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkheadSnapshot {
    pub max_concurrent: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Fixed pool of concurrent-call slots for one downstream, with a bounded
/// queue of callers that may wait up to `max_wait` for a slot.
pub struct Bulkhead {
    service: String,
    max_concurrent: usize,
    max_waiters: usize,
    max_wait: Duration,
    waiting: AtomicUsize,
    semaphore: Arc<Semaphore>,
}

impl Bulkhead {
    pub fn new(service: &str, max_concurrent: usize, max_waiters: usize, max_wait: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            service: service.to_owned(),
            max_concurrent,
            max_waiters,
            max_wait,
            waiting: AtomicUsize::new(0),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn from_cfg(service: &str, cfg: &ResilienceCfg) -> Self {
        Self::new(
            service,
            cfg.bulkhead_max_concurrent,
            cfg.bulkhead_max_waiters,
            Duration::from_millis(cfg.bulkhead_max_wait_ms),
        )
    }

    pub async fn acquire(&self) -> Result<ConcurrencyPermit, BulkheadFull> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(ConcurrencyPermit { _permit: permit });
        }

        let Some(_queued) = self.enqueue() else {
            return Err(self.reject("wait queue full"));
        };
        match tokio::time::timeout(self.max_wait, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(ConcurrencyPermit { _permit: permit }),
            // the semaphore is never closed
            Ok(Err(_)) => Err(self.reject("semaphore closed")),
            Err(_) => Err(self.reject("wait timed out")),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            max_concurrent: self.max_concurrent,
            available: self.available(),
            waiting: self.waiting.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self) -> Option<QueueSlot<'_>> {
        self.waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_waiters).then_some(n + 1)
            })
            .ok()
            .map(|_| QueueSlot(&self.waiting))
    }

    fn reject(&self, reason: &'static str) -> BulkheadFull {
        warn!(service = %self.service, reason, max_concurrent = self.max_concurrent, "bulkhead rejected call");
        metrics::counter!("bulkhead_rejections_total", "service" => self.service.clone()).increment(1);
        BulkheadFull {
            max_concurrent: self.max_concurrent,
        }
    }
}

struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
