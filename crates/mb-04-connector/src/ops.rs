//! Counting of operations in flight, awaited on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Number of operations in flight, with a wake-up when it drops to zero.
#[derive(Default)]
pub(crate) struct OpCounter {
    count: AtomicUsize,
    idle: Notify,
    gauge: Option<prometheus::Gauge>,
}

impl OpCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A counter mirrored into a Prometheus gauge.
    pub(crate) fn with_gauge(gauge: prometheus::Gauge) -> Self {
        Self {
            gauge: Some(gauge),
            ..Self::default()
        }
    }

    pub(crate) fn enter(self: &Arc<Self>) -> OpGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        if let Some(gauge) = &self.gauge {
            gauge.inc();
        }
        OpGuard {
            counter: Arc::clone(self),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until no operation is in flight. Returns false if some still
    /// are after `timeout`.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() == 0;
            }
        }
    }
}

/// Marks one operation in flight until dropped.
pub(crate) struct OpGuard {
    counter: Arc<OpCounter>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.counter.gauge {
            gauge.dec();
        }
        if self.counter.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counter.idle.notify_waiters();
        }
    }
}
