use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::paths;

pub const DEFAULT_SELF_EVENT_WINDOW: Duration = Duration::from_secs(2);

/// Path keys recently changed by the mutation service.
///
/// The watcher cannot tell our own renames and deletes apart from external
/// ones. Removal events are matched against touched keys and their
/// descendants ([`covers`]); additions only against the exact key
/// ([`contains`]), so files dropped into a folder we just created are
/// still picked up.
///
/// [`covers`]: RecentMutations::covers
/// [`contains`]: RecentMutations::contains
pub struct RecentMutations {
    window: Duration,
    entries: DashMap<String, Instant>,
}

impl fmt::Debug for RecentMutations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecentMutations")
            .field("window", &self.window)
            .field("tracked", &self.entries.len())
            .finish()
    }
}

impl Default for RecentMutations {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_EVENT_WINDOW)
    }
}

impl RecentMutations {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: DashMap::new(),
        }
    }

    pub fn record(&self, key: &str) {
        self.entries.insert(key.to_string(), Instant::now());
    }

    /// Whether `key` itself was touched within the window.
    pub fn contains(&self, key: &str) -> bool {
        self.prune();
        self.entries.contains_key(key)
    }

    /// Whether `key` or one of its ancestors was touched within the window.
    pub fn covers(&self, key: &str) -> bool {
        self.prune();
        let mut current = key;
        loop {
            if self.entries.contains_key(current) {
                return true;
            }
            if current.is_empty() {
                return false;
            }
            current = paths::parent_of(current);
            if current.is_empty() {
                // The root is never recorded.
                return false;
            }
        }
    }

    pub fn prune(&self) {
        let window = self.window;
        self.entries.retain(|_, at| at.elapsed() < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
