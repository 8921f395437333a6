//! Local value cache.
//!
//! Holds the records a client has fetched, keyed by key, each stamped with
//! the moment it was last considered fresh. The cache serves inbound peer
//! queries; it is not consulted by the client's own lookups.
//!
//! An entry is valid while `now - timestamp < timeout`. Expired entries are
//! evicted lazily, when a lookup finds them; nothing sweeps the map.
//!
//! Timestamps are asymmetric: a record relayed by a peer never refreshes an
//! existing entry's timestamp, a record fetched from the server always does.
//! This keeps a chain of peer relays from extending the life of stale data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use peerkv_core::wire::ValueRecord;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub timestamp: Instant,
    pub record: ValueRecord,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.timestamp) < timeout
    }
}

/// TTL-bounded record cache shared by the router and the peer listener.
#[derive(Clone)]
pub struct LocalCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    timeout: Duration,
}

impl LocalCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the record if it is still valid; evict it if it has expired.
    pub fn lookup(&self, key: &str) -> Option<ValueRecord> {
        self.lookup_at(key, Instant::now())
    }

    pub fn lookup_at(&self, key: &str, now: Instant) -> Option<ValueRecord> {
        // Fast path: absent keys never take a write lock.
        if !self.entries.contains_key(key) {
            return None;
        }
        // Expiry check and eviction happen under one shard lock.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_valid(now, self.timeout) => {
                Some(entry.get().record.clone())
            }
            Entry::Occupied(entry) => {
                entry.remove();
                tracing::debug!(key, "evicted expired cache entry");
                None
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Store a record obtained from (and verified against) a peer.
    /// An existing entry keeps its timestamp; a new one is stamped now.
    pub fn record_from_peer(&self, key: &str, record: ValueRecord) {
        self.record_from_peer_at(key, record, Instant::now());
    }

    pub fn record_from_peer_at(&self, key: &str, record: ValueRecord, now: Instant) {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().record = record,
            Entry::Vacant(entry) => {
                entry.insert(CacheEntry {
                    timestamp: now,
                    record,
                });
            }
        }
    }

    /// Store a record fetched directly from the server, stamping it now.
    pub fn record_from_server(&self, key: &str, record: ValueRecord) {
        self.record_from_server_at(key, record, Instant::now());
    }

    pub fn record_from_server_at(&self, key: &str, record: ValueRecord, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                timestamp: now,
                record,
            },
        );
    }

    /// Timestamp of the entry for `key`, valid or not.
    pub fn timestamp(&self, key: &str) -> Option<Instant> {
        self.entries.get(key).map(|e| e.timestamp)
    }

    /// Entry count, including expired entries not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
