//! # Defragger
//!
//! Reassembles fragmented messages.
//!
//! ## Rules
//!
//! - Assemblers are keyed by `fromId|msgId` and created by fragment 1 only.
//! - Fragments after the first may arrive in any order.
//! - An assembler idle longer than the idle timeout is dropped, after which
//!   fragments for its key fail with [`FragmentError::MissingFirstFragment`].
//! - A fragment count above the store's limit is refused before anything is
//!   allocated for it.

use crate::error::FragmentError;
use crate::fragmenter::Fragmentable;
use parking_lot::Mutex;
use shared_types::frame::HEADER_FRAGMENT;
use shared_types::message::CONTENT_LENGTH;
use shared_types::header::HeaderValue;
use shared_types::Frame;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Collects the fragments of one message.
#[derive(Debug)]
pub struct Defragger<M> {
    slots: Vec<Option<M>>,
    received: usize,
    last_activity: Instant,
}

impl<M: Fragmentable> Defragger<M> {
    #[must_use]
    pub fn new(max: u32, now: Instant) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(max as usize, || None);
        Self {
            slots,
            received: 0,
            last_activity: now,
        }
    }

    #[must_use]
    pub fn max(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    /// Store a fragment. A repeated index replaces the earlier copy.
    pub fn add(&mut self, index: u32, fragment: M, now: Instant) {
        self.last_activity = now;
        if let Some(slot) = self.slots.get_mut(index as usize - 1) {
            if slot.is_none() {
                self.received += 1;
            }
            *slot = Some(fragment);
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    #[must_use]
    pub fn idle_since(&self) -> Instant {
        self.last_activity
    }

    /// Produce the integrated message: the headers of fragment 1 and the
    /// bodies in index order. Returns `None` while incomplete.
    pub fn integrate(self) -> Option<M> {
        if !self.is_complete() {
            return None;
        }
        let mut parts = self.slots.into_iter().flatten();
        let mut first = parts.next()?;
        let mut body = first.replace_body(Vec::new());
        for part in parts {
            body.extend_from_slice(part.body());
        }
        let headers = first.headers_mut();
        headers.remove(HEADER_FRAGMENT);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        first.replace_body(body);
        Some(first)
    }
}

/// Largest fragment count accepted by default.
pub const DEFAULT_MAX_FRAGMENTS: u32 = 4096;

/// Assemblers of all messages in flight, keyed by `fromId|msgId`.
pub struct DefragStore<M> {
    assemblers: Mutex<HashMap<String, Defragger<M>>>,
    idle_timeout: Duration,
    max_fragments: u32,
}

impl<M: Fragmentable> DefragStore<M> {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            assemblers: Mutex::new(HashMap::new()),
            idle_timeout,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }

    /// Refuse messages announced with more than `limit` fragments.
    #[must_use]
    pub fn with_max_fragments(mut self, limit: u32) -> Self {
        self.max_fragments = limit.max(1);
        self
    }

    pub fn max_fragments(&self) -> u32 {
        self.max_fragments
    }

    /// Add a message that may be a fragment.
    ///
    /// Returns the integrated message once every fragment arrived, `None`
    /// while fragments are still missing.
    pub fn add(&self, from_id: &str, msg_id: &str, msg: M) -> Result<Option<M>, FragmentError> {
        self.add_at(from_id, msg_id, msg, Instant::now())
    }

    pub fn add_at(
        &self,
        from_id: &str,
        msg_id: &str,
        msg: M,
        now: Instant,
    ) -> Result<Option<M>, FragmentError> {
        let (index, max) = Frame::of(msg.headers()).fragment()?;
        if max == 1 {
            return Ok(Some(msg));
        }
        if max > self.max_fragments {
            return Err(FragmentError::TooManyFragments {
                max,
                limit: self.max_fragments,
            });
        }
        let key = format!("{from_id}|{msg_id}");

        let mut assemblers = self.assemblers.lock();
        if let Some(existing) = assemblers.get(&key) {
            if now.saturating_duration_since(existing.idle_since()) > self.idle_timeout {
                assemblers.remove(&key);
                debug!(key = %key, "Dropped stalled assembler");
            }
        }
        if index == 1 && !assemblers.contains_key(&key) {
            assemblers.insert(key.clone(), Defragger::new(max, now));
        }
        let Some(assembler) = assemblers.get_mut(&key) else {
            return Err(FragmentError::MissingFirstFragment { key });
        };
        if assembler.max() != max {
            return Err(FragmentError::MaxMismatch {
                index,
                max,
                expected: assembler.max(),
            });
        }
        assembler.add(index, msg, now);
        if !assembler.is_complete() {
            return Ok(None);
        }
        let complete = assemblers.remove(&key);
        drop(assemblers);
        Ok(complete.and_then(Defragger::integrate))
    }

    /// Drop assemblers idle longer than the idle timeout. Returns how many
    /// were dropped.
    pub fn gc(&self) -> usize {
        self.gc_at(Instant::now())
    }

    pub fn gc_at(&self, now: Instant) -> usize {
        let timeout = self.idle_timeout;
        let mut assemblers = self.assemblers.lock();
        let before = assemblers.len();
        assemblers.retain(|_, a| now.saturating_duration_since(a.idle_since()) <= timeout);
        let dropped = before - assemblers.len();
        if dropped > 0 {
            debug!(dropped, "Garbage collected idle assemblers");
        }
        dropped
    }

    /// Number of messages being assembled.
    pub fn len(&self) -> usize {
        self.assemblers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}
