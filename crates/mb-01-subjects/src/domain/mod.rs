//! Domain Layer - subject encoding
//!
//! RULES:
//! - No I/O operations
//! - No async code

pub mod encoding;
pub mod path_spec;
pub mod subject;

pub use encoding::{encode_path, encode_segment, reverse_host};
pub use path_spec::{PathSpec, Segment};
pub use subject::{instance_host, request_subject, response_subject, subscription_subject};
