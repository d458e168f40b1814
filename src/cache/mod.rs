//! Keyed request cache with TTL freshness, singleflight deduplication and
//! batch LRU eviction.
//!
//! One [`RequestCache`] is built at startup and cloned into every consumer.
//! Values of any type share the same store: entries are type-erased and
//! downcast on the way out.
//!
//! The "fresh entry? → in-flight operation? → start a new one" decision runs
//! under a single lock, so for a given key at most one operation is ever in
//! flight and every concurrent caller observes its result.

pub mod eviction;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::Shared;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

pub use eviction::{DEFAULT_MAX_SIZE, DEFAULT_TTL, EvictionPolicy};

type AnyValue = Arc<dyn Any + Send + Sync>;
type Settled = Result<AnyValue, CacheError>;
type InFlight = Shared<oneshot::Receiver<Settled>>;

/// Error returned by [`RequestCache::cached_request`].
///
/// Cloneable so that every caller waiting on one operation receives the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("{0:#}")]
    Operation(Arc<anyhow::Error>),
    #[error("cached value for key `{key}` has a different type than requested")]
    TypeMismatch { key: String },
    #[error("in-flight request for key `{key}` ended without a result")]
    Abandoned { key: String },
}

impl CacheError {
    /// The underlying operation error, if this is one.
    pub fn operation_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<T> {
    pub(crate) value: T,
    pub(crate) fetched_at: Instant,
    pub(crate) last_accessed_at: Instant,
    /// Tie-breaker for entries touched within the same clock tick.
    pub(crate) access_seq: u64,
}

struct PendingOperation {
    id: u64,
    channel: InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub pending_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry<AnyValue>>,
    pending: HashMap<String, PendingOperation>,
    /// Bumped by `clear_all` so operations started before the clear cannot
    /// repopulate the store.
    generation: u64,
    next_access_seq: u64,
    next_pending_id: u64,
}

impl Store {
    fn touch_seq(&mut self) -> u64 {
        self.next_access_seq += 1;
        self.next_access_seq
    }

    /// Return the value for `key` if it was fetched less than `ttl` ago,
    /// marking it as accessed.
    fn fresh_value(&mut self, key: &str, ttl: Duration, now: Instant) -> Option<AnyValue> {
        let seq = self.touch_seq();
        let entry = self.entries.get_mut(key)?;
        if now.saturating_duration_since(entry.fetched_at) >= ttl {
            return None;
        }
        entry.last_accessed_at = now;
        entry.access_seq = seq;
        Some(entry.value.clone())
    }

    fn remove_pending(&mut self, key: &str, id: u64) -> bool {
        match self.pending.get(key) {
            Some(pending) if pending.id == id => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Process-wide request cache. Clone-cheap.
#[derive(Clone)]
pub struct RequestCache {
    store: Arc<Mutex<Store>>,
    policy: EvictionPolicy,
    default_ttl: Duration,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl RequestCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            policy: EvictionPolicy::new(config.max_size),
            default_ttl: config.default_ttl,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Get a fresh value for `key`, reusing a cached one or an in-flight
    /// operation when possible, otherwise running `operation`.
    ///
    /// `ttl` defaults to the cache's configured TTL. Failures are never cached.
    pub async fn cached_request<T, F, Fut, E>(
        &self,
        key: &str,
        operation: F,
        ttl: Option<Duration>,
    ) -> Result<T, CacheError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let ttl = ttl.unwrap_or(self.default_ttl);

        let (channel, start) = {
            let mut store = self.store.lock().unwrap();

            if let Some(value) = store.fresh_value(key, ttl, Instant::now()) {
                trace!(key, "cache hit");
                return downcast(key, value);
            }

            if let Some(pending) = store.pending.get(key) {
                trace!(key, "joining in-flight request");
                (pending.channel.clone(), None)
            } else {
                let (tx, rx) = oneshot::channel();
                let channel = rx.shared();

                store.next_pending_id += 1;
                let id = store.next_pending_id;
                let generation = store.generation;
                store.pending.insert(
                    key.to_owned(),
                    PendingOperation {
                        id,
                        channel: channel.clone(),
                    },
                );
                debug!(key, "cache miss, fetching");
                (channel, Some((id, generation, tx)))
            }
        };

        // The operation is built outside the lock: a panicking closure must
        // not poison the store, and the guard clears its registration.
        if let Some((id, generation, tx)) = start {
            let guard = PendingGuard {
                store: Arc::clone(&self.store),
                key: key.to_owned(),
                id,
            };
            let operation = operation();
            self.spawn_operation(guard, generation, operation, tx);
        }

        match channel.await {
            Ok(settled) => settled.and_then(|value| downcast(key, value)),
            Err(_) => Err(CacheError::Abandoned {
                key: key.to_owned(),
            }),
        }
    }

    fn spawn_operation<T, Fut, E>(
        &self,
        guard: PendingGuard,
        generation: u64,
        operation: Fut,
        tx: oneshot::Sender<Settled>,
    ) where
        T: Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let policy = self.policy;

        // The guard also clears the registration if the operation panics.
        tokio::spawn(async move {
            let settled: Settled = match operation.await {
                Ok(value) => Ok(Arc::new(value) as AnyValue),
                Err(e) => Err(CacheError::Operation(Arc::new(e.into()))),
            };

            {
                let mut store = store.lock().unwrap();
                match &settled {
                    Ok(value) if store.generation == generation => {
                        let now = Instant::now();
                        let seq = store.touch_seq();
                        store.entries.insert(
                            guard.key.clone(),
                            CacheEntry {
                                value: Arc::clone(value),
                                fetched_at: now,
                                last_accessed_at: now,
                                access_seq: seq,
                            },
                        );
                        evict(&mut store, &policy);
                    }
                    Ok(_) => {
                        debug!(key = %guard.key, "cache cleared while fetching, result not stored");
                    }
                    Err(e) => {
                        debug!(key = %guard.key, error = %e, "fetch failed, nothing cached");
                    }
                }
                store.remove_pending(&guard.key, guard.id);
            }

            let _ = tx.send(settled);
        });
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) {
        if self.store.lock().unwrap().entries.remove(key).is_some() {
            debug!(key, "cache entry invalidated");
        }
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut store = self.store.lock().unwrap();
        let before = store.entries.len();
        store.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - store.entries.len();
        if removed > 0 {
            debug!(prefix, removed, "cache entries invalidated by prefix");
        }
        removed
    }

    /// Empty both the store and the pending registry.
    ///
    /// Callers already waiting on an in-flight operation still get its result,
    /// but that result is not written back.
    pub fn clear_all(&self) {
        let mut store = self.store.lock().unwrap();
        store.entries.clear();
        store.pending.clear();
        store.generation += 1;
        debug!("cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock().unwrap();
        CacheStats {
            size: store.entries.len(),
            pending_count: store.pending.len(),
        }
    }
}

struct PendingGuard {
    store: Arc<Mutex<Store>>,
    key: String,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        // A poisoned lock means another thread already panicked; nothing left to tidy.
        if let Ok(mut store) = self.store.lock() {
            store.remove_pending(&self.key, self.id);
        }
    }
}

fn evict(store: &mut Store, policy: &EvictionPolicy) {
    let victims = policy.select_victims(&store.entries);
    if victims.is_empty() {
        return;
    }
    for key in &victims {
        store.entries.remove(key);
    }
    debug!(
        evicted = victims.len(),
        remaining = store.entries.len(),
        "cache eviction pass"
    );
}

fn downcast<T: Clone + 'static>(key: &str, value: AnyValue) -> Result<T, CacheError> {
    (*value)
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            key: key.to_owned(),
        })
}
