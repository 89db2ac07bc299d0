//! Error types for fragmentation

use shared_types::FrameError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    /// A later fragment arrived for a message whose first fragment was never
    /// seen, or whose assembler was garbage collected.
    #[error("missing first fragment of {key}")]
    MissingFirstFragment { key: String },

    #[error("message of {max} fragments exceeds the limit of {limit}")]
    TooManyFragments { max: u32, limit: u32 },

    #[error("fragment {index}/{max} does not match assembler of {expected} fragments")]
    MaxMismatch { index: u32, max: u32, expected: u32 },

    #[error(transparent)]
    Frame(#[from] FrameError),
}
