//! # Bus Attachment
//!
//! The [`Bus`] trait is the narrow interface connectors use to reach the
//! message broker, and [`InMemoryBus`] is a process-local broker with NATS
//! subject and queue-group semantics.

use crate::subject::{subject_matches, validate_subject};
use crate::subscriber::{BusMessage, BusSubscription};
use crate::{BusError, DEFAULT_MAX_PAYLOAD};
use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A subject-based message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload on a concrete subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a subject pattern.
    ///
    /// Subscribers sharing a `queue` group receive each message exactly once
    /// between them; subscribers without a queue each receive every message.
    async fn subscribe(&self, subject: &str, queue: Option<&str>)
        -> Result<BusSubscription, BusError>;

    /// Largest payload the broker accepts.
    fn max_payload(&self) -> usize;

    /// Detach from the broker. Subscriptions of this attachment end.
    async fn close(&self);
}

struct Entry {
    id: u64,
    owner: u64,
    pattern: String,
    queue: Option<String>,
    sender: mpsc::UnboundedSender<BusMessage>,
}

struct Broker {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
    max_payload: usize,
    messages_published: AtomicU64,
}

impl Broker {
    fn new(max_payload: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_payload,
            messages_published: AtomicU64::new(0),
        }
    }

    fn remove(&self, id: u64) {
        self.entries.write().retain(|e| e.id != id);
    }
}

lazy_static! {
    static ref NAMED_BROKERS: Mutex<HashMap<String, Arc<Broker>>> = Mutex::new(HashMap::new());
}

/// Process-local broker.
///
/// Every `InMemoryBus` value is an attachment: [`InMemoryBus::attach`] returns
/// another attachment to the same broker, and closing one attachment only
/// ends its own subscriptions.
pub struct InMemoryBus {
    broker: Arc<Broker>,
    attachment: u64,
    closed: AtomicBool,
}

impl InMemoryBus {
    /// Create a new broker with the default max payload.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new broker with a specific max payload.
    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self::attach_to(Arc::new(Broker::new(max_payload)))
    }

    /// Attach to the process-wide broker registered under `name`, creating it
    /// on first use.
    #[must_use]
    pub fn named(name: &str) -> Self {
        let broker = NAMED_BROKERS
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Broker::new(DEFAULT_MAX_PAYLOAD)))
            .clone();
        Self::attach_to(broker)
    }

    /// Another attachment to the same broker.
    #[must_use]
    pub fn attach(&self) -> Self {
        Self::attach_to(self.broker.clone())
    }

    fn attach_to(broker: Arc<Broker>) -> Self {
        let attachment = broker.next_id.fetch_add(1, Ordering::Relaxed);
        Self {
            broker,
            attachment,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions across all attachments.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.broker.entries.read().len()
    }

    /// Total messages published on the broker.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.broker.messages_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if payload.len() > self.broker.max_payload {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max: self.broker.max_payload,
            });
        }
        validate_subject(subject)?;
        self.broker.messages_published.fetch_add(1, Ordering::Relaxed);

        let mut targets: Vec<mpsc::UnboundedSender<BusMessage>> = Vec::new();
        {
            let entries = self.broker.entries.read();
            let mut groups: HashMap<&str, Vec<&Entry>> = HashMap::new();
            for entry in entries.iter().filter(|e| subject_matches(&e.pattern, subject)) {
                match entry.queue.as_deref() {
                    Some(q) => groups.entry(q).or_default().push(entry),
                    None => targets.push(entry.sender.clone()),
                }
            }
            let mut rng = rand::thread_rng();
            for members in groups.values() {
                if let Some(pick) = members.choose(&mut rng) {
                    targets.push(pick.sender.clone());
                }
            }
        }

        trace!(subject, receivers = targets.len(), "Message published");
        for target in targets {
            // A closed receiver is a subscription being torn down.
            let _ = target.send(BusMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<BusSubscription, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        validate_subject(subject)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed);
        self.broker.entries.write().push(Entry {
            id,
            owner: self.attachment,
            pattern: subject.to_string(),
            queue: queue.map(str::to_string),
            sender,
        });
        debug!(subject, ?queue, "Bus subscription created");

        let broker = Arc::downgrade(&self.broker);
        Ok(BusSubscription::new(
            receiver,
            subject.to_string(),
            queue.map(str::to_string),
            Box::new(move || {
                if let Some(broker) = broker.upgrade() {
                    broker.remove(id);
                }
            }),
        ))
    }

    fn max_payload(&self) -> usize {
        self.broker.max_payload
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let owner = self.attachment;
        self.broker.entries.write().retain(|e| e.owner != owner);
        debug!(attachment = owner, "Detached from in-memory bus");
    }
}
