//! Map whose entries expire a fixed time after insertion.
//!
//! Expired entries are never returned; they are evicted lazily on access and
//! by [`ExpiringMap::sweep`], which a background task may call periodically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct ExpiringMap<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V> ExpiringMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or replace; the entry's clock restarts.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        Self::evict_expired(&mut entries, self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((at, v)) if at.elapsed() < self.ttl => Some(v.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove and return the live entry for `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.remove(key) {
            Some((at, v)) if at.elapsed() < self.ttl => Some(v),
            _ => None,
        }
    }

    /// Check-then-remove under one lock acquisition.
    ///
    /// `check` sees the live value; the entry is removed only if it returns
    /// `Ok`. Returns `None` when no live entry exists.
    pub fn take_if<E>(&self, key: &K, check: impl FnOnce(&V) -> Result<(), E>) -> Option<Result<V, E>> {
        let mut entries = self.entries.lock();
        let live = match entries.get(key) {
            Some((at, _)) => at.elapsed() < self.ttl,
            None => return None,
        };
        if !live {
            entries.remove(key);
            return None;
        }
        let (_, value) = entries.get(key)?;
        if let Err(e) = check(value) {
            return Some(Err(e));
        }
        entries.remove(key).map(|(_, v)| Ok(v))
    }

    /// Drop every expired entry; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::evict_expired(&mut entries, self.ttl)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        entries.values().filter(|(at, _)| at.elapsed() < self.ttl).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn evict_expired(entries: &mut HashMap<K, (Instant, V)>, ttl: Duration) -> usize {
        let before = entries.len();
        entries.retain(|_, (at, _)| at.elapsed() < ttl);
        before - entries.len()
    }
}
