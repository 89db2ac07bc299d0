//! # MB-01 Subjects
//!
//! Deterministic mapping of `(host, port, path)` addresses to bus subjects.
//!
//! ## Forms
//!
//! - **Request**: where a request is published. Empty paths and paths ending
//!   in `/` are terminated with `_`.
//! - **Subscription**: where a handler listens. Paths ending in `/` are
//!   terminated with the `>` tail wildcard, placeholders become `*` or `>`.
//! - **Response**: where a given connector instance receives replies.
//!
//! ## Reserved Ports
//!
//! - `888`: control requests (`ping`, `config-refresh`, `trace`)
//! - `0`: internal addresses such as tickers
//!
//! ## Usage Example
//!
//! ```
//! use mb_01_subjects::{request_subject, subscription_subject};
//!
//! let req = request_subject("microbus", "www.example.com", 443, "/dir/");
//! assert_eq!(req, "microbus.443.com.example.www.|.dir._");
//!
//! let sub = subscription_subject("microbus", "www.example.com", 443, "/dir/").unwrap();
//! assert_eq!(sub, "microbus.443.com.example.www.|.dir.>");
//! ```

pub mod domain;
pub mod error;

pub use domain::{
    encode_path, instance_host, request_subject, response_subject, reverse_host,
    subscription_subject, PathSpec, Segment,
};
pub use error::SubjectError;
pub use shared_types::{CONTROL_PORT, INTERNAL_PORT};
