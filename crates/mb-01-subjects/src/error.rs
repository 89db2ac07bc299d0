//! Error types for the subject codec

use thiserror::Error;

/// Errors raised while parsing subscription paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    #[error("greedy placeholder must be the last segment of {0:?}")]
    GreedyNotLast(String),

    #[error("malformed placeholder {segment:?} in {path:?}")]
    MalformedPlaceholder { path: String, segment: String },
}
