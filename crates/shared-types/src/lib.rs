//! # Shared Types Crate
//!
//! This crate contains everything that travels over the bus: the HTTP-shaped
//! [`Request`] and [`Response`] built on the `http` types, their [`Headers`], the
//! reserved `Microbus-*` frame headers, the JSON-serialisable [`TracedError`]
//! and the bincode wire codec.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every cross-crate message type is defined here.
//! - **Frame Authority**: sender identity, correlation and budgets are carried
//!   only in the reserved frame headers, never in bodies.
//! - **Errors Cross the Wire**: handler failures are serialised as `TracedError`
//!   JSON and reconstituted on the caller side.

pub mod errors;
pub mod frame;
pub mod headers;
pub mod message;
pub mod url;
pub mod validation;

pub use errors::{StackFrame, TracedError, MAX_STACK_DEPTH};
pub use frame::{strip_reserved, Frame, FrameError, FrameMut, OpCode};
pub use headers::{HeaderError, Headers};
pub use http::{header, Method, StatusCode};
pub use message::{decode, encode, Request, Response, WireError, WireMessage};
pub use url::{join_host_and_path, percent_decode, percent_encode, ParsedUrl, UrlError};
pub use validation::{validate_connector_host, validate_host_name, validate_plane, ValidationError};

/// Default plane (subject namespace) shared by all connectors of a fleet.
pub const DEFAULT_PLANE: &str = "microbus";

/// Reserved port for control requests (`ping`, `config-refresh`, `trace`).
pub const CONTROL_PORT: u16 = 888;

/// Port of internal no-port addresses, such as tickers.
pub const INTERNAL_PORT: u16 = 0;

/// Host name that addresses every connector of the plane.
pub const ALL_HOSTS: &str = "all";
