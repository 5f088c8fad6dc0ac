//! Single-flight guard.
//!
//! At most one operation per key runs at a time. A second caller for a busy
//! key is turned away immediately; nothing is queued and nothing runs later.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightKey {
    CatalogPage,
    LibraryLoad,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flight<T> {
    Completed(T),
    /// Another call with the same key was already running.
    Dropped,
}

impl<T> Flight<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Flight::Completed(value) => Some(value),
            Flight::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Flight::Dropped)
    }
}

pub struct SingleFlight<K = FlightKey> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K> Default for SingleFlight<K> {
    fn default() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` if it is taken. Dropping the guard releases it.
    pub fn try_begin(&self, key: K) -> Option<FlightGuard<K>> {
        let mut active = self.active.lock();
        if !active.insert(key.clone()) {
            return None;
        }

        Some(FlightGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }
}

#[must_use = "the key is released as soon as the guard is dropped"]
pub struct FlightGuard<K: Eq + Hash> {
    active: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
