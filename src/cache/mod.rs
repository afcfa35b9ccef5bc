//! Generation-versioned response cache for offline support.
//!
//! This module provides the request caching mechanism that:
//! - Stores responses keyed by method + URL inside named cache generations
//! - Answers requests cache-first, network-first or stale-while-revalidate
//! - Serves cached data, or a synthetic offline response, when the network is down

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource, CachedEntry};
