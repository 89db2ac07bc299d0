//! # Selective Buffer
//!
//! Tail sampling core. Ended spans go into a fixed ring of atomic cells and
//! are only exported once their trace is selected.
//!
//! ## Hot Path
//!
//! `on_end` takes no lock unless a selection happened within the TTL. The
//! ring insertion index is advanced with `fetch_add` and pulled back by the
//! ring length with `fetch_sub` when it runs past the end.
//!
//! ## Selection
//!
//! Selected trace ids live in two sets, active and shadow, each holding up
//! to half of `max_selected`. A full active set becomes the shadow set and
//! the previous shadow set is discarded. Both sets are reset when the
//! previous selection is older than the TTL.

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of buffered spans.
pub const DEFAULT_MAX_BUFFERED_SPANS: usize = 8192;

/// Default number of selected trace ids across both sets.
pub const DEFAULT_MAX_SELECTED: usize = 4096;

/// Default lifetime of a selection.
pub const DEFAULT_SELECTION_TTL: Duration = Duration::from_secs(20);

/// A span that can be held in the ring.
pub trait BufferedSpan: Clone + Send + Sync + 'static {
    fn trace_id(&self) -> u128;
}

#[derive(Default)]
struct Selection {
    active: HashSet<u128>,
    shadow: HashSet<u128>,
}

/// Ring of ended spans plus the set of selected traces.
pub struct SelectiveBuffer<S> {
    ring: Vec<ArcSwapOption<S>>,
    insertion_point: AtomicUsize,
    selection: Mutex<Selection>,
    /// Milliseconds since `epoch` plus one; zero means never selected.
    last_selected: AtomicU64,
    epoch: Instant,
    ttl: Duration,
    max_selected: usize,
    #[cfg(test)]
    lock_count: AtomicUsize,
}

impl<S: BufferedSpan> SelectiveBuffer<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_BUFFERED_SPANS,
            DEFAULT_MAX_SELECTED,
            DEFAULT_SELECTION_TTL,
        )
    }

    #[must_use]
    pub fn with_limits(max_buffered: usize, max_selected: usize, ttl: Duration) -> Self {
        let max_buffered = max_buffered.max(1);
        let ring = (0..max_buffered).map(|_| ArcSwapOption::empty()).collect();
        Self {
            ring,
            insertion_point: AtomicUsize::new(0),
            selection: Mutex::new(Selection::default()),
            last_selected: AtomicU64::new(0),
            epoch: Instant::now(),
            ttl,
            max_selected: max_selected.max(2),
            #[cfg(test)]
            lock_count: AtomicUsize::new(0),
        }
    }

    /// Handle an ended span.
    ///
    /// Returns the span back when its trace is selected and it must be
    /// exported right away; otherwise the span is kept in the ring.
    pub fn on_end(&self, span: S) -> Option<S> {
        if self.recently_selected() {
            let trace_id = span.trace_id();
            let selected = {
                let selection = self.lock_selection();
                selection.active.contains(&trace_id) || selection.shadow.contains(&trace_id)
            };
            if selected {
                return Some(span);
            }
        }
        self.insert(span);
        None
    }

    /// Select a trace.
    ///
    /// Returns whether the trace was newly selected, and every buffered span
    /// of the trace. Buffered spans are taken out of the ring so that they
    /// are never exported twice.
    pub fn select(&self, trace_id: u128) -> (bool, Vec<S>) {
        let now = self.now_ms();
        let previous = self.last_selected.swap(now, Ordering::AcqRel);
        {
            let mut selection = self.lock_selection();
            if previous == 0 || now.saturating_sub(previous) > self.ttl_ms() {
                selection.active.clear();
                selection.shadow.clear();
            }
            if selection.active.contains(&trace_id) || selection.shadow.contains(&trace_id) {
                return (false, Vec::new());
            }
            if selection.active.len() >= self.max_selected / 2 {
                selection.shadow = std::mem::take(&mut selection.active);
            }
            selection.active.insert(trace_id);
        }
        (true, self.take_trace(trace_id))
    }

    /// Whether a trace is currently selected.
    pub fn is_selected(&self, trace_id: u128) -> bool {
        if !self.recently_selected() {
            return false;
        }
        let selection = self.lock_selection();
        selection.active.contains(&trace_id) || selection.shadow.contains(&trace_id)
    }

    /// Number of ring slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Current insertion index.
    #[must_use]
    pub fn insertion_point(&self) -> usize {
        self.insertion_point.load(Ordering::Acquire)
    }

    /// Span held in a ring slot.
    pub fn slot(&self, index: usize) -> Option<Arc<S>> {
        self.ring.get(index).and_then(|cell| cell.load_full())
    }

    fn insert(&self, span: S) {
        let n = self.ring.len();
        let mut pos = self.insertion_point.fetch_add(1, Ordering::AcqRel);
        if pos >= n {
            self.insertion_point.fetch_sub(n, Ordering::AcqRel);
            pos %= n;
        }
        self.ring[pos].store(Some(Arc::new(span)));
    }

    fn take_trace(&self, trace_id: u128) -> Vec<S> {
        let mut taken = Vec::new();
        for cell in &self.ring {
            let current = cell.load_full();
            let Some(span) = current.as_ref() else {
                continue;
            };
            if span.trace_id() != trace_id {
                continue;
            }
            let previous = cell.compare_and_swap(&current, None::<Arc<S>>);
            let swapped = Option::as_ref(&*previous).is_some_and(|p| Arc::ptr_eq(p, span));
            if swapped {
                taken.push(S::clone(span));
            }
        }
        taken
    }

    fn recently_selected(&self) -> bool {
        let last = self.last_selected.load(Ordering::Acquire);
        last != 0 && self.now_ms().saturating_sub(last) <= self.ttl_ms()
    }

    fn lock_selection(&self) -> MutexGuard<'_, Selection> {
        #[cfg(test)]
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        self.selection.lock()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis())
            .unwrap_or(u64::MAX - 1)
            .saturating_add(1)
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

impl<S: BufferedSpan> Default for SelectiveBuffer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for SelectiveBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectiveBuffer")
            .field("capacity", &self.ring.len())
            .field("max_selected", &self.max_selected)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Parse a 32 hex digit trace id. The all-zero id is invalid.
pub fn parse_trace_id(hex: &str) -> Option<u128> {
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(hex, 16).ok().filter(|id| *id != 0)
}

/// Format a trace id as 32 lowercase hex digits.
#[must_use]
pub fn format_trace_id(trace_id: u128) -> String {
    format!("{trace_id:032x}")
}
