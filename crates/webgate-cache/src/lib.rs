//! Read-through result cache with state-driven invalidation.
//!
//! Successful extract payloads are stored under a fingerprint of
//! (session id, selector, output-affecting parameters) and replayed for
//! identical requests while fresh. Any mutating command in a session drops
//! that session's entries. A singleflight slot per fingerprint guarantees at
//! most one concurrent compute: concurrent requesters for the same key wait
//! for the first to resolve instead of issuing duplicate executor calls.

pub mod fingerprint;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use webgate_protocol::ExtractPayload;

pub use fingerprint::{classify, fingerprint, session_prefix, Cacheability};

/// Capacity and freshness settings.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum stored entries; eviction removes the oldest tenth.
    pub capacity: usize,
    /// Entries older than this are treated as misses.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

struct CacheEntry {
    payload: ExtractPayload,
    captured_at: Instant,
    /// Logical access stamp from `Inner::access_clock`; drives LRU order.
    last_accessed: AtomicU64,
}

/// Cache counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,
}

struct Inner {
    config: CacheConfig,
    access_clock: AtomicU64,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, watch::Receiver<Option<ExtractPayload>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

impl Inner {
    fn next_access(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// Outcome of a cache lookup for a cacheable fingerprint.
pub enum Lookup {
    /// Fresh entry; the payload is already marked `from_cache`.
    Hit(ExtractPayload),
    /// Caller is the leader and must execute, then resolve the flight.
    Miss(Flight),
    /// Another request for the same fingerprint is executing; await it.
    Pending(watch::Receiver<Option<ExtractPayload>>),
}

/// Leader's handle on an in-flight computation. Completing stores the
/// payload and wakes followers; dropping without completing wakes them
/// empty-handed so they can execute themselves.
pub struct Flight {
    inner: Arc<Inner>,
    key: String,
    tx: Option<watch::Sender<Option<ExtractPayload>>>,
}

impl Flight {
    /// Record a successful result and release followers.
    pub fn complete(mut self, payload: &ExtractPayload) {
        self.inner.store(&self.key, payload.clone());
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(payload.clone()));
        }
        self.inner.in_flight.remove(&self.key);
    }

    /// Release followers without storing anything.
    pub fn abort(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(None);
            self.inner.in_flight.remove(&self.key);
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        self.release();
    }
}

impl Inner {
    fn store(&self, key: &str, payload: ExtractPayload) {
        if self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }
        let stamp = self.next_access();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                captured_at: Instant::now(),
                last_accessed: AtomicU64::new(stamp),
            },
        );
    }

    fn evict_oldest(&self) {
        let count = (self.config.capacity / 10).max(1);
        let mut by_access: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed.load(Ordering::Relaxed)))
            .collect();
        by_access.sort_by_key(|(_, at)| *at);

        for (key, _) in by_access.into_iter().take(count) {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!("Evicted {} cache entries", count);
    }
}

/// The process-wide result cache.
pub struct CommandCache {
    inner: Arc<Inner>,
}

impl CommandCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                access_clock: AtomicU64::new(0),
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Look up a fingerprint, claiming the singleflight slot on a miss.
    pub fn lookup(&self, key: &str) -> Lookup {
        if let Some(entry) = self.inner.entries.get(key) {
            if entry.captured_at.elapsed() <= self.inner.config.ttl {
                entry
                    .last_accessed
                    .store(self.inner.next_access(), Ordering::Relaxed);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                let mut payload = entry.payload.clone();
                payload.from_cache = true;
                debug!("Cache hit for {}", key);
                return Lookup::Hit(payload);
            }
        }
        // Stale entries fall through and are overwritten on completion.
        self.inner.entries.remove(key);
        self.inner.misses.fetch_add(1, Ordering::Relaxed);

        // Either join an existing flight or become the leader. The entry
        // API makes the claim atomic under concurrent misses.
        match self.inner.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Lookup::Pending(existing.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx);
                Lookup::Miss(Flight {
                    inner: Arc::clone(&self.inner),
                    key: key.to_string(),
                    tx: Some(tx),
                })
            }
        }
    }

    /// Await a pending flight. Returns the leader's payload (marked
    /// `from_cache`) or `None` when the leader failed and the caller should
    /// execute itself.
    pub async fn wait_for(
        mut rx: watch::Receiver<Option<ExtractPayload>>,
    ) -> Option<ExtractPayload> {
        // The initial value is None; the leader sends exactly once.
        match rx.changed().await {
            Ok(()) => rx.borrow().clone().map(|mut p| {
                p.from_cache = true;
                p
            }),
            Err(_) => None,
        }
    }

    /// Drop every entry scoped to a session.
    pub fn invalidate_session(&self, session_id: &str) {
        let prefix = session_prefix(session_id);
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();

        let removed = keys.len() as u64;
        for key in keys {
            self.inner.entries.remove(&key);
        }
        if removed > 0 {
            self.inner.invalidations.fetch_add(removed, Ordering::Relaxed);
            debug!("Invalidated {} cache entries for session {}", removed, session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}
