//! In-flight Request Store - correlates bus responses to waiting publishers.
//!
//! Flow:
//! 1. `publish` generates a message id and calls `register()` before the
//!    first fragment goes out
//! 2. The response loop calls `deliver()` for every ack, response and error
//! 3. The correlation task owns the returned [`Registration`]; dropping it
//!    is the single release point of the entry

use dashmap::DashMap;
use mb_telemetry::metrics::LATE_RESPONSES;
use parking_lot::Mutex;
use shared_types::Response;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

struct InFlight {
    sender: mpsc::UnboundedSender<Response>,
    created_at: Instant,
}

/// Statistics for the in-flight store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_late: AtomicU64,
}

/// Await channels of requests in flight, keyed by message id.
#[derive(Default)]
pub struct InFlightRequests {
    pending: DashMap<String, InFlight>,
    stats: PendingStats,
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiving end of its await channel.
    pub fn register(
        self: &Arc<Self>,
        msg_id: &str,
    ) -> (Registration, mpsc::UnboundedReceiver<Response>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.pending.insert(
            msg_id.to_string(),
            InFlight {
                sender,
                created_at: Instant::now(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            store: Arc::clone(self),
            msg_id: msg_id.to_string(),
        };
        (registration, receiver)
    }

    /// Hand a response to the request waiting for it.
    ///
    /// Returns false if no request is waiting, i.e. the response is late.
    pub fn deliver(&self, msg_id: &str, res: Response) -> bool {
        let delivered = self
            .pending
            .get(msg_id)
            .is_some_and(|entry| entry.sender.send(res).is_ok());
        if delivered {
            self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.total_late.fetch_add(1, Ordering::Relaxed);
            LATE_RESPONSES.inc();
            debug!(msg_id = %msg_id, "Response for unknown or completed request");
        }
        delivered
    }

    fn release(&self, msg_id: &str) {
        if let Some((_, entry)) = self.pending.remove(msg_id) {
            debug!(
                msg_id = %msg_id,
                elapsed_ms = entry.created_at.elapsed().as_millis(),
                "Released in-flight request"
            );
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, msg_id: &str) -> bool {
        self.pending.contains_key(msg_id)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Ownership of one in-flight entry. The entry is removed on drop.
pub struct Registration {
    store: Arc<InFlightRequests>,
    msg_id: String,
}

impl Registration {
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.store.release(&self.msg_id);
    }
}

/// Queue names that answered the last successful multicast, per subject.
///
/// Advisory only: a match lets the publisher stop waiting for acks early.
#[derive(Default)]
pub struct KnownResponders {
    by_subject: Mutex<HashMap<String, HashSet<String>>>,
}

impl KnownResponders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &str) -> Option<HashSet<String>> {
        self.by_subject.lock().get(subject).cloned()
    }

    pub fn store(&self, subject: &str, queues: HashSet<String>) {
        self.by_subject.lock().insert(subject.to_string(), queues);
    }

    pub fn clear(&self, subject: &str) {
        self.by_subject.lock().remove(subject);
    }
}
