//! Key-value cache contract consumed by the ticker cache.
//!
//! Only get/set/delete with TTL matters to the core; the actual transport
//! (Redis, memcached, …) is a deployment concern. [`MemoryCache`] is the
//! in-process fallback backend and the one used by tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Minimal string KV contract. Implementations must be infallible from the
/// caller's perspective; transport errors are handled (and logged) inside.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>);
    fn delete(&self, key: &str);
}

/// In-memory TTL cache. Entries are evicted lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    store: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut store = self.store.lock();
        match store.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => {
                store.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.store
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
    }

    fn delete(&self, key: &str) {
        self.store.lock().remove(key);
    }
}
