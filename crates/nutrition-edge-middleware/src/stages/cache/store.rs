//! Bounded, TTL-aware response store.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// A stored response.
///
/// Built once on a miss and never mutated; hits share it through an `Arc`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Response status, always 2xx.
    pub status: StatusCode,
    /// Response headers as produced by the handler.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// `ETag` of the response, if it had one.
    pub etag: Option<String>,
    /// `Last-Modified` of the response, or the store time.
    pub last_modified: SystemTime,
    /// Wall-clock expiry, rendered in `X-Cache-Expires`.
    pub expires_at: SystemTime,
    deadline: Instant,
}

impl CachedResponse {
    /// Creates an entry that lives for `ttl` from now.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
        let etag = headers
            .get(http::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let now = SystemTime::now();
        let last_modified = headers
            .get(http::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .unwrap_or(now);

        Self {
            status,
            headers,
            body,
            etag,
            last_modified,
            expires_at: now + ttl,
            deadline: Instant::now() + ttl,
        }
    }

    /// Returns `true` once the entry's TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Point-in-time statistics of a [`ResponseStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, expired ones included.
    pub total_entries: usize,
    /// Capacity.
    pub max_entries: usize,
    /// Held entries whose TTL has elapsed.
    pub expired_entries: usize,
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
}

/// Fingerprint → response map with a capacity bound.
///
/// Hits take the read lock. Stores, evictions, `clear` and the removal of an
/// expired entry found on read take the write lock.
#[derive(Debug)]
pub struct ResponseStore {
    entries: RwLock<HashMap<String, Arc<CachedResponse>>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseStore {
    /// Creates a store holding at most `max_entries` responses.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the live entry for `key`. An expired entry is removed.
    pub fn lookup(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let now = Instant::now();
        let found = self.entries.read().get(key).cloned();

        match found {
            Some(entry) if !entry.is_expired_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                let mut entries = self.entries.write();
                if entries.get(key).is_some_and(|e| e.is_expired_at(now)) {
                    entries.remove(key);
                }
                drop(entries);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `entry` under `key`, evicting first if the store is full.
    pub fn store(&self, key: String, entry: CachedResponse) {
        if self.max_entries == 0 {
            return;
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let evicted = evict(&mut entries, self.max_entries);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, remaining = entries.len(), "Evicted cached responses");
        }
        entries.insert(key, Arc::new(entry));
    }

    /// Removes the entry for `key`.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Capacity.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Entries removed to make room so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read();
        let expired_entries = entries.values().filter(|e| e.is_expired_at(now)).count();
        let total_entries = entries.len();
        drop(entries);

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            total_entries,
            max_entries: self.max_entries,
            expired_entries,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// Drops expired entries, then about a tenth of the capacity (at least one)
/// in iteration order until there is room.
fn evict(entries: &mut HashMap<String, Arc<CachedResponse>>, max_entries: usize) -> usize {
    let before = entries.len();
    let now = Instant::now();
    entries.retain(|_, e| !e.is_expired_at(now));

    if entries.len() >= max_entries {
        let batch = (max_entries / 10).max(1);
        let victims: Vec<String> = entries.keys().take(batch).cloned().collect();
        for key in victims {
            entries.remove(&key);
        }
    }
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &'static str, ttl: Duration) -> CachedResponse {
        CachedResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body), ttl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_returns_stored_body() {
        let store = ResponseStore::new(10);
        store.store("k".to_string(), entry("hello", Duration::from_secs(60)));

        let hit = store.lookup("k").unwrap();
        assert_eq!(hit.body, Bytes::from("hello"));
        assert!(store.lookup("other").is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_removed_on_read() {
        let store = ResponseStore::new(10);
        store.store("k".to_string(), entry("x", Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.stats().expired_entries, 1);
        assert!(store.lookup("k").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_evicts_before_insert() {
        let store = ResponseStore::new(20);
        for i in 0..20 {
            store.store(format!("k{i}"), entry("x", Duration::from_secs(60)));
        }
        assert_eq!(store.len(), 20);

        store.store("new".to_string(), entry("y", Duration::from_secs(60)));
        assert_eq!(store.len(), 19);
        assert_eq!(store.evictions(), 2);
        assert!(store.lookup("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_store_evicts_at_least_one() {
        let store = ResponseStore::new(1);
        store.store("a".to_string(), entry("a", Duration::from_secs(60)));
        store.store("b".to_string(), entry("b", Duration::from_secs(60)));
        assert_eq!(store.len(), 1);
        assert!(store.lookup("b").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let store = ResponseStore::new(1);
        store.store("a".to_string(), entry("a", Duration::from_secs(60)));
        store.store("a".to_string(), entry("b", Duration::from_secs(60)));
        assert_eq!(store.evictions(), 0);
        assert_eq!(store.lookup("a").unwrap().body, Bytes::from("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_stores_nothing() {
        let store = ResponseStore::new(0);
        store.store("a".to_string(), entry("a", Duration::from_secs(60)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let store = ResponseStore::new(10);
        store.store("a".to_string(), entry("a", Duration::from_secs(60)));
        store.clear();
        assert!(store.lookup("a").is_none());
    }

    #[test]
    fn test_entry_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::ETAG, "\"abc\"".parse().unwrap());
        headers.insert(
            http::header::LAST_MODIFIED,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        let entry = CachedResponse::new(StatusCode::OK, headers, Bytes::new(), Duration::from_secs(5));
        assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
        assert_eq!(
            entry.last_modified,
            httpdate::parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap()
        );
    }
}
