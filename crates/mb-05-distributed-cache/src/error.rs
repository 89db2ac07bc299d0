//! Error types for the distributed cache

use mb_04_connector::ConnectorError;
use shared_types::TracedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,

    #[error("invalid base path {path:?}")]
    InvalidBasePath { path: String },

    /// Subscribing or unsubscribing the peer endpoints failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// A broadcast to the peers could not be made.
    #[error("peer request failed: {0}")]
    Peer(#[from] TracedError),
}

impl CacheError {
    /// Convert for handlers, which answer with [`TracedError`]s.
    #[track_caller]
    pub fn into_traced(self) -> TracedError {
        match self {
            Self::Peer(e) => e,
            Self::Connector(e) => e.into_traced(),
            other => TracedError::with_code(400, other.to_string()),
        }
    }
}
