//! Cache domain: the local LRU and the load options.

pub mod local;
pub mod options;

pub use local::{CacheStats, LocalCache, DEFAULT_MAX_AGE, DEFAULT_MAX_WEIGHT};
pub use options::LoadOptions;
