//! Error types for the connector

use shared_bus::BusError;
use shared_types::TracedError;
use thiserror::Error;

/// Synchronous failures of connector operations.
///
/// Failures that cross the bus or reach handlers are [`TracedError`]s
/// instead; see [`ConnectorError::into_traced`].
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("already started")]
    AlreadyStarted,

    #[error("not started")]
    NotStarted,

    #[error("host name is not set")]
    MissingHostName,

    #[error("invalid host name {0:?}")]
    InvalidHost(String),

    #[error("invalid plane {0:?}")]
    InvalidPlane(String),

    #[error("invalid deployment {0:?}")]
    InvalidDeployment(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),

    #[error("invalid path {0:?}")]
    InvalidPath(String),

    #[error("invalid queue {0:?}")]
    InvalidQueue(String),

    #[error("invalid url {0:?}")]
    InvalidUrl(String),

    #[error("bus: {0}")]
    Bus(#[from] BusError),

    #[error("callback failed: {0}")]
    Callback(TracedError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("resource {name:?}: {reason}")]
    Resource { name: String, reason: String },
}

impl ConnectorError {
    /// Status code used when the error is returned to a caller.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotStarted => 503,
            Self::Bus(_) => 502,
            Self::Callback(e) => e.status_code(),
            Self::Resource { .. } => 404,
            Self::AlreadyStarted => 500,
            _ => 400,
        }
    }

    #[track_caller]
    pub fn into_traced(self) -> TracedError {
        match self {
            Self::Callback(e) => e,
            other => TracedError::with_code(other.status_code(), other.to_string()),
        }
    }
}

/// Errors defining, setting and resolving configuration properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config {0:?} is not defined")]
    Undefined(String),

    #[error("config {0:?} is already defined")]
    AlreadyDefined(String),

    #[error("invalid config name {0:?}")]
    InvalidName(String),

    #[error("invalid validation rule {0:?}")]
    InvalidRule(String),

    #[error("value of config {name:?} fails validation {rule}")]
    InvalidValue { name: String, rule: String },

    #[error("config {0:?} can only be set before startup or in LOCAL and TESTING")]
    Locked(String),

    #[error("cannot read {path}: {reason}")]
    EnvFile { path: String, reason: String },
}
