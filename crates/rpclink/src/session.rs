//! Connection-scoped key/value storage for handlers.
//!
//! A session lives and dies with its connection and is never shared with
//! another one. Typical use is stashing an authenticated identity in one
//! request and reading it back in later ones.
//!
//! Each key is individually synchronized; there is no atomicity across keys.
//! Handlers running concurrently that need a read-modify-write over several
//! keys must coordinate themselves.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Session {
    entries: DashMap<String, Entry>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning whether a previous value was replaced.
    pub fn insert<T>(&self, key: impl Into<String>, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value)).is_some()
    }

    /// Returns the value under `key` if it exists and has type `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self.entries.get(key)?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Like [`Session::get`], but clones the value out.
    pub fn get_cloned<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.get::<T>(key).map(|value| (*value).clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("Session").field("keys", &keys).finish()
    }
}
