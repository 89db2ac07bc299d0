//! # MB-05 Distributed Cache
//!
//! An LRU cache spread over the replicas of a microservice. Each replica
//! holds a weight-bounded local LRU; stores, loads and deletes are
//! coordinated with the peers over the bus.
//!
//! ## Invariants
//!
//! - A load returns a value only if every copy found agrees.
//! - A peer admits an offered value only while under half its max weight.
//! - Closing a replica hands its elements to a surviving peer.
//!
//! ## Example
//!
//! ```rust,ignore
//! let cache = DistribCache::new(Arc::new(con.clone())).await?;
//! con.startup().await?;
//! cache.store(&ctx, "user:1", body).await?;
//! let hit = cache.load(&ctx, "user:1", LoadOptions::new()).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod cache;
pub mod domain;
pub mod error;

mod peer;

pub use cache::{DistribCache, DEFAULT_BASE_PATH, RESCUE_TIMEOUT};
pub use domain::{CacheStats, LoadOptions, LocalCache, DEFAULT_MAX_AGE, DEFAULT_MAX_WEIGHT};
pub use error::CacheError;
