use crate::error::CacheError;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// Outcome broadcast to callers that joined someone else's computation.
type Shared<V> = std::result::Result<V, String>;

struct CacheEntry<V> {
    value: V,
    created: Instant,
    last_access: Instant,
    size: usize,
}

struct Flight<V> {
    id: u64,
    rx: watch::Receiver<Option<Shared<V>>>,
}

#[derive(Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    coalesced: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
    bypassed: u64,
}

struct State<K, V> {
    entries: Option<LruCache<K, CacheEntry<V>>>,
    in_flight: HashMap<K, Flight<V>>,
    /// Bumped by every clear; a flight started under an older epoch never populates.
    epoch: u64,
    next_flight: u64,
    closed: bool,
    counters: Counters,
}

impl<K: Hash + Eq + Clone, V: Clone> State<K, V> {
    fn lookup(&mut self, key: &K, ttl: Option<Duration>) -> Option<V> {
        let entries = self.entries.as_mut()?;
        let now = Instant::now();
        match entries.get_mut(key) {
            None => return None,
            Some(entry) => {
                let expired = ttl.is_some_and(|ttl| now.duration_since(entry.created) >= ttl);
                if !expired {
                    entry.last_access = now;
                    return Some(entry.value.clone());
                }
            }
        }
        entries.pop(key);
        self.counters.expirations += 1;
        None
    }

    fn store(&mut self, name: &str, key: K, value: V, size: usize) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created: now,
            last_access: now,
            size,
        };
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                self.counters.evictions += 1;
                log::debug!("Cache '{name}' evicted least recently used entry");
            }
        }
    }

    fn finish_flight(&mut self, key: &K, id: u64) {
        if self.in_flight.get(key).is_some_and(|flight| flight.id == id) {
            self.in_flight.remove(key);
        }
    }

    fn clear(&mut self) -> usize {
        self.epoch += 1;
        self.in_flight.clear();
        let removed = self.entries.as_ref().map_or(0, LruCache::len);
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.counters.invalidations += removed as u64;
        removed
    }
}

fn lock<K, V>(state: &Mutex<State<K, V>>) -> MutexGuard<'_, State<K, V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the in-flight marker even if the computation panics.
struct FlightGuard<K: Hash + Eq + Clone, V: Clone> {
    state: Arc<Mutex<State<K, V>>>,
    key: K,
    id: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        lock(&self.state).finish_flight(&self.key, self.id);
    }
}

enum Role<K, V> {
    Bypass,
    Waiter(watch::Receiver<Option<Shared<V>>>),
    Leader {
        key: K,
        id: u64,
        epoch: u64,
        publish: watch::Sender<Option<Shared<V>>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub entries: usize,
    pub capacity: usize,
    pub estimated_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub bypassed: u64,
    pub in_flight: usize,
    pub oldest_entry_age_secs: Option<u64>,
    pub ttl_secs: Option<u64>,
    pub closed: bool,
}

/// Bounded LRU with optional TTL where concurrent misses on one key share a
/// single computation.
///
/// The internal lock is held only for bookkeeping, never across an `.await`,
/// so computations for distinct keys run fully in parallel. Computations run
/// on their own task: a caller that gives up does not cancel the work, and the
/// value still lands in the cache for the next caller.
pub struct FlightCache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl: Option<Duration>,
    sizer: fn(&V) -> usize,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V> FlightCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: &'static str, capacity: usize, ttl: Option<Duration>) -> Self {
        let entries = NonZeroUsize::new(capacity).map(LruCache::new);
        if entries.is_none() {
            log::warn!("Cache '{name}' has zero capacity; lookups compute directly");
        }
        Self {
            name,
            capacity,
            ttl,
            sizer: |_| 1,
            state: Arc::new(Mutex::new(State {
                entries,
                in_flight: HashMap::new(),
                epoch: 0,
                next_flight: 0,
                closed: false,
                counters: Counters::default(),
            })),
        }
    }

    /// Size estimate recorded with each entry and summed in [`CacheStats`].
    #[must_use]
    pub fn with_sizer(mut self, sizer: fn(&V) -> usize) -> Self {
        self.sizer = sizer;
        self
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the cached value or runs `compute` once for all concurrent callers.
    ///
    /// When a shared computation fails or vanishes, its waiters go back through
    /// leader election, so a key never has more than one computation running.
    /// `compute` may still be invoked for a direct, uncached computation when the
    /// cache cannot serve the caller: zero capacity, shut down, or the caller's
    /// own flight task lost. Errors are never cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        loop {
            let role = {
                let mut state = lock(&self.state);
                if state.closed || state.entries.is_none() {
                    state.counters.bypassed += 1;
                    Role::Bypass
                } else if let Some(value) = state.lookup(&key, self.ttl) {
                    state.counters.hits += 1;
                    return Ok(value);
                } else if let Some(rx) = state.in_flight.get(&key).map(|flight| flight.rx.clone()) {
                    state.counters.coalesced += 1;
                    Role::Waiter(rx)
                } else {
                    state.counters.misses += 1;
                    state.next_flight += 1;
                    let id = state.next_flight;
                    let (publish, rx) = watch::channel(None);
                    state.in_flight.insert(key.clone(), Flight { id, rx });
                    Role::Leader {
                        key: key.clone(),
                        id,
                        epoch: state.epoch,
                        publish,
                    }
                }
            };

            match role {
                Role::Bypass => return compute().await,
                Role::Waiter(rx) => match wait_for(rx).await {
                    Some(Ok(value)) => return Ok(value),
                    Some(Err(message)) => {
                        log::debug!(
                            "Cache '{}' shared computation failed ({message}); electing a new leader",
                            self.name
                        );
                    }
                    None => {
                        log::warn!(
                            "{}; electing a new leader",
                            CacheError::FlightAbandoned(self.name)
                        );
                    }
                },
                Role::Leader {
                    key,
                    id,
                    epoch,
                    publish,
                } => {
                    let (tx, rx) = oneshot::channel();
                    self.spawn_flight(key, id, epoch, publish, compute(), tx);
                    return if let Ok(outcome) = rx.await {
                        outcome
                    } else {
                        log::warn!("{}; computing directly", CacheError::FlightAbandoned(self.name));
                        compute().await
                    };
                }
            }
        }
    }

    fn spawn_flight<Fut, E>(
        &self,
        key: K,
        id: u64,
        epoch: u64,
        publish: watch::Sender<Option<Shared<V>>>,
        fut: Fut,
        leader: oneshot::Sender<Result<V, E>>,
    ) where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let name = self.name;
        let sizer = self.sizer;
        tokio::spawn(async move {
            let guard = FlightGuard {
                state: Arc::clone(&state),
                key,
                id,
            };
            let outcome = fut.await;
            let shared = match &outcome {
                Ok(value) => {
                    let mut state = lock(&state);
                    if state.epoch == epoch && !state.closed {
                        state.store(name, guard.key.clone(), value.clone(), sizer(value));
                    } else {
                        log::debug!("Cache '{name}' dropped a value computed before invalidation");
                    }
                    Ok(value.clone())
                }
                Err(err) => Err(err.to_string()),
            };
            drop(guard);
            publish.send_replace(Some(shared));
            let _ = leader.send(outcome);
        });
    }

    /// Synchronous lookup-or-build without single-flight, for cheap values.
    pub fn get_or_insert_with<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        {
            let mut state = lock(&self.state);
            if state.closed || state.entries.is_none() {
                state.counters.bypassed += 1;
                drop(state);
                return build();
            }
            if let Some(value) = state.lookup(&key, self.ttl) {
                state.counters.hits += 1;
                return Ok(value);
            }
            state.counters.misses += 1;
        }
        let value = build()?;
        let size = (self.sizer)(&value);
        let mut state = lock(&self.state);
        if !state.closed {
            state.store(self.name, key, value.clone(), size);
        }
        Ok(value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = lock(&self.state);
        let found = state.lookup(key, self.ttl);
        if found.is_some() {
            state.counters.hits += 1;
        } else {
            state.counters.misses += 1;
        }
        found
    }

    pub fn insert(&self, key: K, value: V) {
        let size = (self.sizer)(&value);
        let mut state = lock(&self.state);
        if !state.closed {
            state.store(self.name, key, value, size);
        }
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let mut state = lock(&self.state);
        let removed = state
            .entries
            .as_mut()
            .and_then(|entries| entries.pop(key))
            .is_some();
        state.in_flight.remove(key);
        if removed {
            state.counters.invalidations += 1;
        }
        removed
    }

    /// Drops every entry and detaches running computations from the cache.
    pub fn clear(&self) -> usize {
        let removed = lock(&self.state).clear();
        if removed > 0 {
            log::debug!("Cache '{}' cleared {removed} entries", self.name);
        }
        removed
    }

    /// Flushes the cache; afterwards every lookup computes directly.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.clear();
        state.closed = true;
    }

    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut state = lock(&self.state);
        let now = Instant::now();
        let expired: Vec<K> = state
            .entries
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| now.duration_since(entry.created) >= ttl)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(entries) = state.entries.as_mut() {
            for key in &expired {
                entries.pop(key);
            }
        }
        state.counters.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        let counters = state.counters;
        let now = Instant::now();
        let (entries, estimated_size, oldest) = state.entries.as_ref().map_or((0, 0, None), |entries| {
            let size: usize = entries.iter().map(|(_, entry)| entry.size).sum();
            let oldest = entries
                .iter()
                .map(|(_, entry)| now.duration_since(entry.created))
                .max();
            (entries.len(), size, oldest)
        });
        let served = counters.hits + counters.coalesced;
        let lookups = served + counters.misses;
        CacheStats {
            name: self.name.to_string(),
            entries,
            capacity: self.capacity,
            estimated_size,
            hits: counters.hits,
            misses: counters.misses,
            coalesced: counters.coalesced,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                served as f64 / lookups as f64
            },
            evictions: counters.evictions,
            expirations: counters.expirations,
            invalidations: counters.invalidations,
            bypassed: counters.bypassed,
            in_flight: state.in_flight.len(),
            oldest_entry_age_secs: oldest.map(|age| age.as_secs()),
            ttl_secs: self.ttl.map(|ttl| ttl.as_secs()),
            closed: state.closed,
        }
    }

    /// Seconds since the given entry was last served, if present.
    pub fn idle_secs(&self, key: &K) -> Option<u64> {
        let state = lock(&self.state);
        state
            .entries
            .as_ref()
            .and_then(|entries| entries.peek(key))
            .map(|entry| entry.last_access.elapsed().as_secs())
    }
}

async fn wait_for<V: Clone>(mut rx: watch::Receiver<Option<Shared<V>>>) -> Option<Shared<V>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}
