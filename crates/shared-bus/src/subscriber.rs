//! # Bus Subscriptions
//!
//! The receiving side of the bus. A [`BusSubscription`] yields every message
//! delivered to its subject and detaches from the bus when dropped.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

/// A message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete subject the message was published on.
    pub subject: String,
    pub payload: Vec<u8>,
}

type Unsubscriber = Box<dyn FnOnce() + Send + Sync>;

/// A subscription handle for receiving messages.
///
/// When dropped, the subscription is automatically removed from the bus.
pub struct BusSubscription {
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    subject: String,
    queue: Option<String>,
    unsubscriber: Option<Unsubscriber>,
}

impl BusSubscription {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<BusMessage>,
        subject: String,
        queue: Option<String>,
        unsubscriber: Unsubscriber,
    ) -> Self {
        Self {
            receiver,
            subject,
            queue,
            unsubscriber: Some(unsubscriber),
        }
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the subscription was detached or the bus closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Subject pattern this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Queue group, if load-balanced.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Detach from the bus. Messages already queued remain readable.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscriber.take() {
            unsubscribe();
            debug!(subject = %self.subject, "Bus subscription removed");
        }
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription")
            .field("subject", &self.subject)
            .field("queue", &self.queue)
            .field("active", &self.unsubscriber.is_some())
            .finish()
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for BusSubscription {
    type Item = BusMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
