//! # MB-02 Fragmentation
//!
//! Messages whose body exceeds the bus payload limit are split into indexed
//! fragments and reassembled by the receiver.
//!
//! ## Invariants
//!
//! - Splitting then reassembling any body yields the original bytes.
//! - Only fragment 1 is acknowledged; it opens the assembler.
//! - A later fragment with no assembler fails rather than waiting forever.

pub mod defragger;
pub mod error;
pub mod fragmenter;

pub use defragger::{DefragStore, Defragger, DEFAULT_MAX_FRAGMENTS};
pub use error::FragmentError;
pub use fragmenter::{fragment, fragment_count, Fragmentable};

/// Room kept for headers when deriving the max fragment size from the bus
/// max payload.
pub const HEADER_ALLOWANCE: usize = 64 * 1024;

/// Largest body per fragment for a given bus max payload.
#[must_use]
pub fn max_fragment_size(max_payload: usize) -> usize {
    max_payload.saturating_sub(HEADER_ALLOWANCE).max(1024)
}
