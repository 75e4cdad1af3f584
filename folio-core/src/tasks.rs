use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Keyed work queue that drops duplicates instead of queueing them.
///
/// At most one task per key is in flight. A second request for a key that
/// is still running is a no-op; callers that need a fresh result after a
/// burst should trigger again once the first task settles. Running tasks
/// share a semaphore so a burst of distinct keys stays bounded.
pub struct TaskCoalescer {
    name: &'static str,
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
    started: AtomicU64,
    coalesced: AtomicU64,
}

impl fmt::Debug for TaskCoalescer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCoalescer")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight.lock().len())
            .field("permits_available", &self.permits.available_permits())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("coalesced", &self.coalesced.load(Ordering::Relaxed))
            .finish()
    }
}

/// Marks a key in flight until dropped.
pub struct TaskGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGuard").field("key", &self.key).finish()
    }
}

impl TaskGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

impl TaskCoalescer {
    pub fn new(name: &'static str, concurrency: usize) -> Self {
        Self {
            name,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            started: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Claim `key`, or `None` if a task for it is already running.
    pub fn try_begin(&self, key: impl Into<String>) -> Option<TaskGuard> {
        let key = key.into();
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(key.clone()) {
            drop(in_flight);
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(queue = self.name, key = %key, "task already in flight, coalesced");
            return None;
        }
        self.started.fetch_add(1, Ordering::Relaxed);
        Some(TaskGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Spawn `task` under `key` unless one is already in flight.
    pub fn spawn<F>(
        &self,
        key: impl Into<String>,
        task: F,
    ) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.try_begin(key)?;
        let permits = Arc::clone(&self.permits);
        Some(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let output = task.await;
            drop(guard);
            output
        }))
    }

    /// Run `task` inline under `key`; `None` if the key was already taken.
    pub async fn run<F: Future>(
        &self,
        key: impl Into<String>,
        task: F,
    ) -> Option<F::Output> {
        let guard = self.try_begin(key)?;
        let _permit = self.permits.acquire().await.ok();
        let output = task.await;
        drop(guard);
        Some(output)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
