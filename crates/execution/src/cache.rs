//! Lazily populated cache with single-flight population.
//!
//! Each key moves through `Empty -> Populating -> Populated`. The first
//! caller to miss becomes the leader and drives the computation inside its
//! own `get` call; concurrent callers for the same key subscribe to the
//! leader's `watch` channel and receive the very same result. The entry map is only
//! locked for state transitions, never while a computation is pending, so
//! unrelated keys proceed independently.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tandem_core::Result;
use tokio::sync::watch;
use tracing::{debug, warn};

type Published<V> = Option<Result<V>>;

enum Entry<V> {
    Populating(watch::Receiver<Published<V>>),
    Populated(V),
}

/// Observable state of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing cached and nothing in flight
    Empty,
    /// A computation is in flight
    Populating,
    /// A value is cached
    Populated,
}

enum Role<V> {
    Leader(watch::Sender<Published<V>>),
    Follower(watch::Receiver<Published<V>>),
}

/// Key/value cache with single-flight population.
pub struct MemoizedAsyncCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    computations: AtomicUsize,
}

impl<K, V> MemoizedAsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        // Entries are replaced atomically under the lock, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the value for `key`, computing it with `compute` on a miss.
    ///
    /// A hit returns without suspending. On a miss exactly one caller runs
    /// `compute`; every concurrent caller for the same key waits for and
    /// receives that caller's result, failure included. A failed
    /// computation leaves the key empty so a later call retries.
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let publisher = loop {
            let role = {
                let mut entries = self.entries();
                match entries.get(&key) {
                    Some(Entry::Populated(value)) => return Ok(value.clone()),
                    Some(Entry::Populating(rx)) => Role::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(key.clone(), Entry::Populating(rx));
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => break tx,
                Role::Follower(mut rx) => {
                    debug!(key = ?key, "Waiting for in-flight computation");
                    match rx.wait_for(Option::is_some).await {
                        Ok(published) => {
                            if let Some(result) = published.clone() {
                                return result;
                            }
                        }
                        Err(_) => {
                            // Leader went away without publishing; the entry is empty again.
                            debug!(key = ?key, "Leader abandoned computation, retrying");
                        }
                    }
                }
            }
        };

        self.computations.fetch_add(1, Ordering::Relaxed);
        debug!(key = ?key, "Cache miss, computing");

        let mut population = Population {
            cache: self,
            key: &key,
            publisher: Some(publisher),
        };
        let result = compute().await;
        population.publish(result.clone());
        result
    }

    /// The cached value for `key`, without computing or waiting.
    pub fn peek(&self, key: &K) -> Option<V> {
        match self.entries().get(key) {
            Some(Entry::Populated(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Current state of `key`.
    pub fn state(&self, key: &K) -> EntryState {
        match self.entries().get(key) {
            None => EntryState::Empty,
            Some(Entry::Populating(_)) => EntryState::Populating,
            Some(Entry::Populated(_)) => EntryState::Populated,
        }
    }

    /// Drop the cached value for `key`.
    ///
    /// In-flight computations are left alone. Returns whether a value was
    /// removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.entries();
        if matches!(entries.get(key), Some(Entry::Populated(_))) {
            entries.remove(key);
            debug!(key = ?key, "Invalidated cache entry");
            true
        } else {
            false
        }
    }

    /// Number of populated keys.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|e| matches!(e, Entry::Populated(_)))
            .count()
    }

    /// Whether no key is populated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of computations started since creation.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

impl<K, V> Default for MemoizedAsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The leader's claim on a `Populating` entry.
///
/// Dropping it unpublished (the leader's future was dropped mid-computation)
/// resets the key to empty and wakes the followers so one of them takes over.
struct Population<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    cache: &'a MemoizedAsyncCache<K, V>,
    key: &'a K,
    publisher: Option<watch::Sender<Published<V>>>,
}

impl<K, V> Population<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn publish(&mut self, result: Result<V>) {
        let Some(publisher) = self.publisher.take() else {
            return;
        };

        {
            let mut entries = self.cache.entries();
            match &result {
                Ok(value) => {
                    entries.insert(self.key.clone(), Entry::Populated(value.clone()));
                }
                Err(e) => {
                    entries.remove(self.key);
                    warn!(key = ?self.key, "Cache population failed: {}", e);
                }
            }
        }

        publisher.send_replace(Some(result));
    }
}

impl<K, V> Drop for Population<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if self.publisher.is_some() {
            self.cache.entries().remove(self.key);
            debug!(key = ?self.key, "Computation dropped before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem_core::OpError;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_computation() {
        let cache: MemoizedAsyncCache<&str, u64> = MemoizedAsyncCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let gets = (0..8).map(|_| {
            let calls = calls.clone();
            cache.get("x", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(42)
            })
        });

        let results = join_all(gets).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computations(), 1);
        assert!(results.iter().all(|r| r == &Ok(42)));
        assert_eq!(cache.state(&"x"), EntryState::Populated);
    }

    #[tokio::test]
    async fn test_hit_does_not_recompute() {
        let cache: MemoizedAsyncCache<String, u64> = MemoizedAsyncCache::new();

        assert_eq!(cache.get("k".to_string(), || async { Ok(1) }).await, Ok(1));
        let second = cache.get("k".to_string(), || async { Ok(2) }).await;

        assert_eq!(second, Ok(1));
        assert_eq!(cache.computations(), 1);
        assert_eq!(cache.peek(&"k".to_string()), Some(1));
    }

    #[tokio::test]
    async fn test_hit_resolves_on_first_poll() {
        let cache: MemoizedAsyncCache<u8, u8> = MemoizedAsyncCache::new();
        cache.get(1, || async { Ok(9) }).await.unwrap();

        let hit = cache.get(1, || async { Ok(0) }).now_or_never();
        assert_eq!(hit, Some(Ok(9)));
    }

    #[tokio::test]
    async fn test_failed_population_is_retried() {
        let cache: MemoizedAsyncCache<&str, u32> = MemoizedAsyncCache::new();

        let first = cache.get("k", || async { Err(OpError::computation("flaky")) }).await;
        assert_eq!(first, Err(OpError::computation("flaky")));
        assert_eq!(cache.state(&"k"), EntryState::Empty);

        let second = cache.get("k", || async { Ok(5) }).await;
        assert_eq!(second, Ok(5));
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_receive_the_same_failure() {
        let cache: MemoizedAsyncCache<&str, u32> = MemoizedAsyncCache::new();

        let gets = (0..3).map(|_| {
            cache.get("k", || async {
                sleep(Duration::from_millis(10)).await;
                Err(OpError::computation("backend down"))
            })
        });
        let results = join_all(gets).await;

        assert_eq!(cache.computations(), 1);
        assert!(results
            .iter()
            .all(|r| r == &Err(OpError::computation("backend down"))));
        assert_eq!(cache.state(&"k"), EntryState::Empty);
    }

    #[tokio::test]
    async fn test_unrelated_keys_are_not_blocked() {
        let cache: MemoizedAsyncCache<&str, u32> = MemoizedAsyncCache::new();
        let (release, released) = oneshot::channel::<()>();

        let slow = cache.get("slow", || async move {
            let _ = released.await;
            Ok(1)
        });
        let fast = async {
            assert_eq!(cache.state(&"slow"), EntryState::Populating);
            let value = cache.get("fast", || async { Ok(2) }).await;
            let _ = release.send(());
            value
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow, Ok(1));
        assert_eq!(fast, Ok(2));
    }

    #[tokio::test]
    async fn test_dropped_leader_hands_over_to_waiter() {
        let cache: MemoizedAsyncCache<&str, u32> = MemoizedAsyncCache::new();

        let mut leader = Box::pin(cache.get("k", std::future::pending::<Result<u32>>));
        let mut follower = Box::pin(cache.get("k", || async { Ok(7) }));

        assert!(futures::poll!(leader.as_mut()).is_pending());
        assert!(futures::poll!(follower.as_mut()).is_pending());
        assert_eq!(cache.state(&"k"), EntryState::Populating);

        drop(leader);
        assert_eq!(cache.state(&"k"), EntryState::Empty);

        assert_eq!(follower.await, Ok(7));
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_only_removes_populated() {
        let cache: MemoizedAsyncCache<&str, u32> = MemoizedAsyncCache::new();
        assert!(!cache.invalidate(&"k"));

        cache.get("k", || async { Ok(1) }).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&"k"));
        assert!(cache.is_empty());

        assert_eq!(cache.get("k", || async { Ok(2) }).await, Ok(2));
    }
}
