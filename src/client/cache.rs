//! Client-side directory cache and change notification.

use crate::vfs::NodeAttributes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Change made through this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Created(String),
    Deleted(String),
    Changed(String),
    Moved { from: String, to: String },
}

type Callback = Arc<dyn Fn(&NodeEvent) + Send + Sync>;

/// Subscriber list for [`NodeEvent`]s.
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the returned id unsubscribes it.
    pub fn subscribe<F>(&self, callback: F) -> u64
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn publish(&self, event: &NodeEvent) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe
        let subs: Vec<Callback> = self.subscribers.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for cb in subs {
            cb(event);
        }
    }
}

#[derive(Default)]
struct Listing {
    generation: u64,
    children: Vec<NodeAttributes>,
    loaded: bool,
    needs_refresh: bool,
}

/// Proof that a refresh started at a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    path: String,
    generation: u64,
}

impl RefreshToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Cached directory listings keyed by remote path.
///
/// Only an invalidation bumps a directory's generation. A refresh that
/// finishes on the generation it started from replaces the children and
/// clears the refresh flag; a refresh overtaken by an invalidation only
/// merges what it saw and leaves the flag set.
#[derive(Default)]
pub struct DirectoryCache {
    dirs: Mutex<HashMap<String, Arc<Mutex<Listing>>>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn listing(&self, path: &str) -> Arc<Mutex<Listing>> {
        self.dirs
            .lock()
            .entry(path.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Listing {
                    needs_refresh: true,
                    ..Listing::default()
                }))
            })
            .clone()
    }

    /// Children when the listing is loaded and current.
    pub fn get(&self, path: &str) -> Option<Vec<NodeAttributes>> {
        let listing = self.dirs.lock().get(path).cloned()?;
        let listing = listing.lock();
        (listing.loaded && !listing.needs_refresh).then(|| listing.children.clone())
    }

    pub fn begin_refresh(&self, path: &str) -> RefreshToken {
        let listing = self.listing(path);
        let generation = listing.lock().generation;
        RefreshToken {
            path: path.to_string(),
            generation,
        }
    }

    /// Store the result of a refresh; true when it committed cleanly.
    pub fn commit(&self, token: RefreshToken, children: Vec<NodeAttributes>) -> bool {
        let listing = self.listing(&token.path);
        let mut listing = listing.lock();
        listing.loaded = true;
        if listing.generation == token.generation {
            listing.children = children;
            listing.needs_refresh = false;
            return true;
        }
        for child in children {
            match listing.children.iter_mut().find(|c| c.name == child.name) {
                Some(existing) => *existing = child,
                None => listing.children.push(child),
            }
        }
        listing.needs_refresh = true;
        false
    }

    /// Mark a directory stale.
    pub fn invalidate(&self, path: &str) {
        let listing = self.listing(path);
        let mut listing = listing.lock();
        listing.generation += 1;
        listing.needs_refresh = true;
    }

    /// Forget a directory and everything cached beneath it.
    pub fn remove_tree(&self, path: &str) {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        self.dirs
            .lock()
            .retain(|p, _| p != path && !p.starts_with(&prefix));
    }

    pub fn generation(&self, path: &str) -> u64 {
        self.dirs
            .lock()
            .get(path)
            .map_or(0, |l| l.lock().generation)
    }

    pub fn needs_refresh(&self, path: &str) -> bool {
        self.dirs
            .lock()
            .get(path)
            .map_or(true, |l| l.lock().needs_refresh)
    }
}
