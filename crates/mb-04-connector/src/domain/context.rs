//! # Operation Context
//!
//! Every handler, tick, task and callback receives an [`OpContext`]. It
//! bounds the operation by a deadline and by the connector lifetime, and
//! carries the frame of the inbound request so that nested requests can
//! continue its call depth, time budget and trace.

use shared_types::{Frame, Headers, TracedError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation scope and inbound frame of one operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    deadline: Option<Instant>,
    /// `true` once the connector shuts down. `None` never cancels.
    lifetime: Option<watch::Receiver<bool>>,
    frame: Arc<Headers>,
}

impl OpContext {
    /// A context with no deadline that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self {
            deadline: None,
            lifetime: None,
            frame: Arc::new(Headers::new()),
        }
    }

    pub(crate) fn with_lifetime(lifetime: watch::Receiver<bool>) -> Self {
        Self {
            deadline: None,
            lifetime: Some(lifetime),
            frame: Arc::new(Headers::new()),
        }
    }

    pub(crate) fn with_frame(mut self, headers: Headers) -> Self {
        self.frame = Arc::new(headers);
        self
    }

    /// A child context that expires after `timeout`, or earlier if this
    /// context expires first.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context that expires at `deadline`, or earlier if this
    /// context expires first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero once passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the connector that issued this context is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.lifetime.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_shutting_down() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the deadline passes or the connector shuts down.
    pub async fn cancelled(&self) {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            () = deadline => {}
            () = wait_shutdown(self.lifetime.clone()) => {}
        }
    }

    /// Run a future to completion unless the context is cancelled first.
    ///
    /// Cancellation yields a 408 `timeout` when the deadline passed and a
    /// 503 when the connector is shutting down.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TracedError> {
        tokio::select! {
            out = fut => Ok(out),
            () = self.cancelled() => Err(self.cancellation_error()),
        }
    }

    pub(crate) fn cancellation_error(&self) -> TracedError {
        if self.is_shutting_down() {
            TracedError::with_code(503, "shutting down")
        } else {
            TracedError::with_code(408, "timeout")
        }
    }

    /// Headers of the inbound request this operation serves.
    pub fn headers(&self) -> &Headers {
        &self.frame
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame::of(&self.frame)
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

async fn wait_shutdown(lifetime: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = lifetime else {
        return std::future::pending().await;
    };
    // A dropped sender means the connector is gone.
    let _ = rx.wait_for(|shutting_down| *shutting_down).await;
}
