//! In-memory caching

pub mod existence;

pub use existence::{CacheLookup, ExistenceCache, ExistenceCacheStats, DEFAULT_EXISTENCE_TTL};
