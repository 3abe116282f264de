//! Age-bounded single-slot object cache.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default staleness bound for cached objects.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    subject_id: String,
    value: T,
    fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() <= max_age
    }
}

/// Holds the last fetched object for one subject.
///
/// Entries are replaced whole on every `put` and never partially updated.
/// All operations are synchronous.
#[derive(Debug)]
pub struct CachedObjectStore<T> {
    entry: Mutex<Option<CacheEntry<T>>>,
}

impl<T: Clone> CachedObjectStore<T> {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CacheEntry<T>>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value if it belongs to `subject_id` and is no
    /// older than `max_age`.
    pub fn get(&self, subject_id: &str, max_age: Duration) -> Option<T> {
        self.lock()
            .as_ref()
            .filter(|entry| entry.subject_id == subject_id && entry.is_fresh(max_age))
            .map(|entry| entry.value.clone())
    }

    /// Stores `value`, resetting its age to zero.
    pub fn put(&self, subject_id: impl Into<String>, value: T) {
        *self.lock() = Some(CacheEntry {
            subject_id: subject_id.into(),
            value,
            fetched_at: Instant::now(),
        });
    }

    /// Drops the entry if it belongs to `subject_id`. Returns whether
    /// anything was removed.
    pub fn invalidate(&self, subject_id: &str) -> bool {
        let mut entry = self.lock();
        if entry.as_ref().is_some_and(|e| e.subject_id == subject_id) {
            *entry = None;
            return true;
        }
        false
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    /// Age of the current entry, fresh or not.
    pub fn age(&self, subject_id: &str) -> Option<Duration> {
        self.lock()
            .as_ref()
            .filter(|entry| entry.subject_id == subject_id)
            .map(|entry| entry.fetched_at.elapsed())
    }
}

impl<T: Clone> Default for CachedObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
