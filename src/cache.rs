//! The content cache.
//!
//! Assembled feed bytes keyed by `sha256(page URL)[..16] +
//! sha256(options)[..8]`, TTL-bounded, LRU-evicted by insertion age, with
//! coalesced production: concurrent misses on one key share a single
//! producer whose result (or failure) reaches every waiter.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::assemble::FeedKind;
use crate::error::FeedError;
use crate::model::FeedOptions;
use crate::util::PageUrl;

/// Soft upper bound on cached entries.
const MAX_ENTRIES: usize = 100;

/// Assembled feed bytes plus their content-type tag.
#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub bytes: Arc<Vec<u8>>,
    pub kind: FeedKind,
    /// Wall-clock insertion time, served as `Last-Modified`.
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    feed: CachedFeed,
    inserted: Instant,
}

/// Counters exposed at `/cache/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

type ProduceSlot = Option<Result<CachedFeed, FeedError>>;

struct CacheInner {
    entries: RwLock<HashMap<String, StoredEntry>>,
    pending: Mutex<HashMap<String, watch::Receiver<ProduceSlot>>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Handle to the shared cache; clones are cheap.
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<CacheInner>,
}

/// First 16 hex characters of `sha256(normalized page URL)` — the prefix
/// every option variant of a page shares, which is what `clear_by_page`
/// matches on.
pub fn page_prefix(url: &PageUrl) -> String {
    hex_prefix(url.as_str().as_bytes(), 16)
}

/// Full cache key: page prefix plus 8 hex characters of the canonical
/// option serialization. A function of `(normalized URL, canonical
/// options)` and nothing else.
pub fn cache_key(url: &PageUrl, opts: &FeedOptions) -> String {
    format!(
        "{}{}",
        page_prefix(url),
        hex_prefix(opts.canonical().as_bytes(), 8)
    )
}

/// `ETag` value: first 16 hex characters of `sha256(url || options)`.
pub fn etag(url: &PageUrl, opts: &FeedOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hasher.update(opts.canonical().as_bytes());
    let digest = hasher.finalize();
    to_hex(&digest)[..16].to_owned()
}

fn hex_prefix(input: &[u8], chars: usize) -> String {
    let digest = Sha256::digest(input);
    to_hex(&digest)[..chars].to_owned()
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut out, "{byte:02x}").expect("writing to String cannot fail");
    }
    out
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, MAX_ENTRIES)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                ttl,
                max_entries,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Looks a key up, counting the hit or miss. Expired entries are
    /// evicted on the spot.
    pub async fn get(&self, key: &str) -> Option<CachedFeed> {
        match self.inner.fresh_entry(key).await {
            Some(feed) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(feed)
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Produces the value for `key`, coalescing concurrent callers.
    ///
    /// The first caller's future runs on a detached task, so a caller
    /// abandoning the request does not cancel production — the result
    /// still lands in the cache for later consumers. Every concurrent
    /// caller receives the same bytes, and a producer failure propagates
    /// to all of them identically (nothing is cached on failure).
    ///
    /// # Errors
    ///
    /// Whatever the producing future returns, or
    /// [`FeedError::Internal`] if the producer vanished without reporting.
    pub async fn produce<F>(&self, key: &str, make: F) -> Result<CachedFeed, FeedError>
    where
        F: Future<Output = Result<CachedFeed, FeedError>> + Send + 'static,
    {
        let mut rx = {
            let mut pending = self.inner.pending.lock().await;

            // Double-check under the lock: a producer may have finished
            // between the caller's miss and this point
            if let Some(feed) = self.inner.fresh_entry(key).await {
                return Ok(feed);
            }

            if let Some(rx) = pending.get(key) {
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                pending.insert(key.to_owned(), rx.clone());

                let inner = self.inner.clone();
                let key_owned = key.to_owned();
                tokio::spawn(async move {
                    let result = make.await;
                    if let Ok(feed) = &result {
                        inner.insert(&key_owned, feed.clone()).await;
                    }
                    inner.pending.lock().await.remove(&key_owned);
                    let _ = tx.send(Some(result));
                });

                rx
            }
        };

        loop {
            {
                let slot = rx.borrow_and_update();
                if let Some(result) = slot.as_ref() {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(FeedError::Internal(
                    "feed producer terminated without a result".to_owned(),
                ));
            }
        }
    }

    /// Proactive sweep: drops every expired entry, returning the count.
    pub async fn sweep(&self) -> usize {
        let ttl = self.inner.ttl;
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed = removed, remaining = entries.len(), "Cache sweep");
        }
        removed
    }

    /// Removes all entries and resets the hit/miss counters.
    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
    }

    /// Removes every entry for the page, across all option variants.
    pub async fn clear_by_page(&self, url: &PageUrl) -> usize {
        let prefix = page_prefix(url);
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.read().await.len();
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl CacheInner {
    async fn fresh_entry(&self, key: &str) -> Option<CachedFeed> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted.elapsed() < self.ttl => {
                    return Some(entry.feed.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Lazy eviction of the expired entry
        self.entries.write().await.remove(key);
        None
    }

    async fn insert(&self, key: &str, feed: CachedFeed) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_owned(),
            StoredEntry {
                feed,
                inserted: Instant::now(),
            },
        );

        if entries.len() > self.max_entries {
            // Evict the least-recently-inserted fifth
            let evict = entries.len().div_ceil(5);
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.inserted))
                .collect();
            by_age.sort_by_key(|(_, inserted)| *inserted);
            for (key, _) in by_age.into_iter().take(evict) {
                entries.remove(&key);
            }
            tracing::debug!(evicted = evict, remaining = entries.len(), "Cache overflow eviction");
        }
    }
}
