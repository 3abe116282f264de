//! TTL-bounded caching of fetched objects.

mod store;

pub use store::{CachedObjectStore, DEFAULT_MAX_AGE};
