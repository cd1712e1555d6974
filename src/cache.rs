//! §6 `Cache`: `get`/`put`/`remove`/`update`, keyed by method + canonical URL
//! + `Vary` header set. Storage format is opaque to the core (Non-goal, §1);
//! the core ships an in-memory reference implementation.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use http::HeaderMap;

use crate::{request::Request, response::ResponseMeta};

/// A cached response: the original response metadata plus the body bytes
/// (buffered, since the cache owns its own copy independent of the
/// single-pass network body).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub meta: ResponseMeta,
    pub body: bytes::Bytes,
    pub stored_at: Instant,
    pub vary_headers: HeaderMap,
}

impl CacheEntry {
    pub(crate) fn is_fresh(&self, max_age: Duration) -> bool {
        self.stored_at.elapsed() < max_age
    }
}

/// A pluggable response cache (§6). `get`/`put`/`remove`/`update` must be
/// safe for concurrent invocation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, request: &Request) -> Option<CacheEntry>;
    async fn put(&self, request: &Request, entry: CacheEntry);
    async fn remove(&self, request: &Request);
    /// Called after a successful conditional revalidation (304): replaces
    /// the cached metadata while keeping the previously-stored body.
    async fn update(&self, request: &Request, fresh_meta: ResponseMeta);
}

impl fmt::Debug for dyn Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Cache")
    }
}

fn cache_key(request: &Request) -> String {
    // Method + canonical URL; Vary-header matching happens at entry level.
    format!("{} {}", request.method(), request.url())
}

/// A capacity-bounded in-memory cache; the reference implementation named
/// in §6. Eviction is simple LRU by insertion order, not meant to compete
/// with a production disk-backed cache.
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<HashMap<String, CacheEntry>>,
    order: Mutex<Vec<String>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(MemoryCache {
            capacity,
            inner: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        })
    }

    fn touch(&self, key: &str) {
        let mut order = self.order.lock().unwrap();
        order.retain(|k| k != key);
        order.push(key.to_string());
        while order.len() > self.capacity {
            let evicted = order.remove(0);
            self.inner.lock().unwrap().remove(&evicted);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, request: &Request) -> Option<CacheEntry> {
        let key = cache_key(request);
        let entry = self.inner.lock().unwrap().get(&key).cloned();
        if entry.is_some() {
            self.touch(&key);
        }
        entry
    }

    async fn put(&self, request: &Request, entry: CacheEntry) {
        let key = cache_key(request);
        self.inner.lock().unwrap().insert(key.clone(), entry);
        self.touch(&key);
    }

    async fn remove(&self, request: &Request) {
        let key = cache_key(request);
        self.inner.lock().unwrap().remove(&key);
        self.order.lock().unwrap().retain(|k| k != &key);
    }

    async fn update(&self, request: &Request, fresh_meta: ResponseMeta) {
        let key = cache_key(request);
        if let Some(entry) = self.inner.lock().unwrap().get_mut(&key) {
            entry.meta = fresh_meta;
            entry.stored_at = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use http::{Method, StatusCode};
    use crate::response::Protocol;

    fn req() -> Request {
        RequestBuilder::new(Method::GET, "https://example.test/a").build().unwrap()
    }

    fn entry() -> CacheEntry {
        CacheEntry {
            meta: ResponseMeta { status: StatusCode::OK, headers: HeaderMap::new(), protocol: Protocol::H2 },
            body: bytes::Bytes::from_static(b"hi"),
            stored_at: Instant::now(),
            vary_headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = MemoryCache::new(8);
        cache.put(&req(), entry()).await;
        let got = cache.get(&req()).await.unwrap();
        assert_eq!(got.body, bytes::Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = MemoryCache::new(1);
        let r1 = RequestBuilder::new(Method::GET, "https://example.test/a").build().unwrap();
        let r2 = RequestBuilder::new(Method::GET, "https://example.test/b").build().unwrap();
        cache.put(&r1, entry()).await;
        cache.put(&r2, entry()).await;
        assert!(cache.get(&r1).await.is_none());
        assert!(cache.get(&r2).await.is_some());
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let cache = MemoryCache::new(8);
        cache.put(&req(), entry()).await;
        cache.remove(&req()).await;
        assert!(cache.get(&req()).await.is_none());
    }
}
