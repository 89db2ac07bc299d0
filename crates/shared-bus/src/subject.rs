//! # Subject Matching
//!
//! NATS-style subjects: dot-separated tokens, `*` matches exactly one token,
//! a trailing `>` matches one or more remaining tokens.

use crate::BusError;

/// Whether a subscription pattern matches a concrete subject.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check that a subject (or pattern) is well formed.
///
/// Tokens must be nonempty and free of whitespace, and `>` may only appear
/// as the final token.
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    let invalid = || BusError::InvalidSubject(subject.to_string());
    if subject.is_empty() {
        return Err(invalid());
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        if *token == ">" && i + 1 != tokens.len() {
            return Err(invalid());
        }
    }
    Ok(())
}
