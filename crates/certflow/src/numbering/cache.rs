use core::hash::Hash;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// A small map whose entries expire a fixed time after insertion.
///
/// Expired entries are dropped on access, and [`insert`] sweeps the whole
/// map at most once per TTL, so keys that are never read again do not
/// accumulate: the map holds at most two TTLs' worth of inserts.
///
/// [`insert`]: TtlCache::insert
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    state: Mutex<CacheState<K, V>>,
}

#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, (Instant, V)>,
    next_sweep: Instant,
}

impl<K: Eq + Hash, V> CacheState<K, V> {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (expires_at, _)| now < *expires_at);
        before - self.entries.len()
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let entries = &mut state.entries;
        match entries.get(key) {
            Some((expires_at, value)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now >= state.next_sweep {
            state.purge(now);
            state.next_sweep = now + self.ttl;
        }
        state.entries.insert(key, (now + self.ttl, value));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().entries.remove(key).map(|(_, v)| v)
    }

    /// Drops every entry whose key matches `predicate`.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) {
        self.state.lock().entries.retain(|k, _| !predicate(k));
    }

    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge(Instant::now())
    }

    /// Entries held, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
