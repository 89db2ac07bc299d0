//! # Validation
//!
//! Host name and plane rules shared by the connector and the subject codec.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid host name {0:?}")]
    InvalidHost(String),

    #[error("host name {0:?} is reserved")]
    ReservedHost(String),

    #[error("invalid plane {0:?}")]
    InvalidPlane(String),
}

/// Validate a dotted host name, `^[a-z0-9]+(\.[a-z0-9]+)*$` ignoring case.
///
/// Returns the lowercased host.
pub fn validate_host_name(host: &str) -> Result<String, ValidationError> {
    let lower = host.to_ascii_lowercase();
    let valid = !lower.is_empty()
        && lower
            .split('.')
            .all(|label| !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric()));
    if valid {
        Ok(lower)
    } else {
        Err(ValidationError::InvalidHost(host.to_string()))
    }
}

/// Validate a host name a connector may be bound to. `all` and `*.all` are
/// reserved for broadcasts.
pub fn validate_connector_host(host: &str) -> Result<String, ValidationError> {
    let lower = validate_host_name(host)?;
    if lower == crate::ALL_HOSTS || lower.ends_with(".all") {
        return Err(ValidationError::ReservedHost(host.to_string()));
    }
    Ok(lower)
}

/// Validate a plane, `^[0-9a-zA-Z]+$`.
pub fn validate_plane(plane: &str) -> Result<(), ValidationError> {
    if !plane.is_empty() && plane.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPlane(plane.to_string()))
    }
}
