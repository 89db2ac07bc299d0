//! # Microbus Test Suite
//!
//! Scenarios spanning several connectors on one in-memory bus.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs        # Connector builders
//!     ├── requests.rs        # Unicast, multicast, panics, ping
//!     ├── limits.rs          # Call depth and time budget
//!     ├── load_balancing.rs  # Queue groups
//!     ├── fragmentation.rs   # Oversize bodies
//!     ├── cache.rs           # Distributed cache properties
//!     ├── config.rs          # Environment resolution
//!     └── tickers.rs         # Recurring jobs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mb-tests
//! cargo test -p mb-tests integration::cache::
//! ```

pub mod integration;
