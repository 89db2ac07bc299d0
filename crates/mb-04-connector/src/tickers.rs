//! # Tickers
//!
//! Named jobs run on a fixed interval while the connector is started. A
//! tick that comes due while the previous one of the same ticker still
//! runs is skipped. Each tick counts as a pending operation and is bounded
//! by the interval. Tickers do not run in the `TESTING` deployment, where
//! tests drive the jobs themselves.

use crate::connector::{Connector, Inner};
use crate::domain::{run_guarded, Deployment, Job, OpContext};
use crate::error::ConnectorError;
use crate::ops::OpCounter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

pub(crate) struct Ticker {
    interval: Duration,
    job: Arc<dyn Job>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn new(interval: Duration, job: Arc<dyn Job>) -> Self {
        Self {
            interval,
            job,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn start(&mut self, name: &str, pending_ops: Arc<OpCounter>, lifetime: OpContext) {
        self.stop();
        self.handle = Some(tokio::spawn(tick_loop(
            name.to_string(),
            self.interval,
            Arc::clone(&self.job),
            Arc::clone(&self.running),
            pending_ops,
            lifetime,
        )));
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    name: String,
    interval: Duration,
    job: Arc<dyn Job>,
    running: Arc<AtomicBool>,
    pending_ops: Arc<OpCounter>,
    lifetime: OpContext,
) {
    let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            () = lifetime.cancelled() => return,
        }
        if running.swap(true, Ordering::AcqRel) {
            debug!(ticker = %name, "Skipped tick, previous tick still running");
            continue;
        }
        let guard = pending_ops.enter();
        let ctx = lifetime.with_timeout(interval);
        let job = Arc::clone(&job);
        let running = Arc::clone(&running);
        let name = name.clone();
        tokio::spawn(async move {
            let job_ctx = ctx.clone();
            let result = run_guarded(&ctx, async move { job.run(job_ctx).await }).await;
            running.store(false, Ordering::Release);
            drop(guard);
            if let Err(e) = result {
                error!(ticker = %name, status = e.status_code(), error = %e, "Tick failed");
            }
        });
    }
}

impl Inner {
    fn tickers_enabled(&self) -> bool {
        self.is_started()
            && self
                .resolved()
                .is_some_and(|r| r.deployment != Deployment::Testing)
    }

    pub(crate) fn start_tickers(&self) {
        if !self.tickers_enabled() {
            return;
        }
        let mut tickers = self.tickers.lock();
        for (name, ticker) in tickers.iter_mut() {
            ticker.start(name, Arc::clone(&self.pending_ops), self.lifetime_context());
        }
    }

    pub(crate) fn stop_tickers(&self) {
        for ticker in self.tickers.lock().values_mut() {
            ticker.stop();
        }
    }
}

impl Connector {
    /// Run `job` every `interval` while started, replacing any ticker of
    /// the same name.
    pub fn start_ticker<J: Job>(&self, name: &str, interval: Duration, job: J) -> Result<(), ConnectorError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ConnectorError::InvalidPath(format!(":0/{name}")));
        }
        if interval.is_zero() {
            return Err(ConnectorError::InvalidPath(format!(":0/{name}")));
        }
        let mut ticker = Ticker::new(interval, Arc::new(job));
        if self.inner.tickers_enabled() {
            ticker.start(name, Arc::clone(&self.inner.pending_ops), self.lifetime_context());
        }
        self.inner.tickers.lock().insert(name.to_string(), ticker);
        debug!(ticker = %name, interval = ?interval, "Ticker registered");
        Ok(())
    }

    /// Remove a ticker. Returns false if there was none by that name.
    pub fn stop_ticker(&self, name: &str) -> bool {
        self.inner.tickers.lock().remove(name).is_some()
    }

    /// Names of the registered tickers.
    pub fn tickers(&self) -> Vec<String> {
        self.inner.tickers.lock().keys().cloned().collect()
    }
}
