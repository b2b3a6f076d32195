//! Response cache middleware: an LRU-backed store of cached responses,
//! wired into the chain with conditional revalidation headers and
//! hit/miss/eviction stats.

use async_trait::async_trait;
use http::StatusCode;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// A cached entry, keyed by `"<METHOD>:<URL>"`. Live iff `now < expires_at`
/// (`spec.md` §3); an entry with no `expires_at` never expires on its own.
#[derive(Clone)]
struct CacheEntry {
    status: StatusCode,
    headers: http::HeaderMap,
    body: bytes::Bytes,
    expires_at: Option<u64>,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(expiry) => now_unix() < expiry,
            None => true,
        }
    }
}

/// Running hit/miss/eviction/store counters (`spec.md` §3, §5).
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stores: u64,
}

/// Cache middleware configuration.
#[derive(Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Default TTL applied when a response carries no `Cache-Control`/
    /// `Expires` and wasn't explicitly marked uncacheable.
    pub default_ttl: Option<Duration>,
    /// Methods eligible for caching (`spec.md` §4.7's default: GET/HEAD).
    pub cacheable_methods: HashSet<http::Method>,
    /// Optional predicate: requests this returns `true` for are never
    /// consulted or populated, matching `CircuitBreakerConfig`'s
    /// closure-field pattern for caller-supplied eligibility rules.
    pub skip_cache_for: Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            default_ttl: Some(Duration::from_secs(60)),
            cacheable_methods: [http::Method::GET, http::Method::HEAD].into_iter().collect(),
            skip_cache_for: None,
        }
    }
}

impl CacheConfig {
    /// Override which methods are eligible for caching.
    pub fn with_cacheable_methods(mut self, methods: impl IntoIterator<Item = http::Method>) -> Self {
        self.cacheable_methods = methods.into_iter().collect();
        self
    }

    /// Set the `skipCacheFor(req)` predicate (`spec.md` §4.7).
    pub fn with_skip_cache_for<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip_cache_for = Some(Arc::new(f));
        self
    }
}

/// LRU backend: `get(key)`, `set(key, entry)`, `delete(key)`, `clear`,
/// `stats` (`spec.md` §4.7's backend contract). `get` on an expired entry
/// removes it and counts one miss and one eviction, not a hit.
pub struct ResponseCache {
    store: RwLock<LruCache<String, CacheEntry>>,
    stats: RwLock<CacheStats>,
    default_ttl: Option<Duration>,
}

impl ResponseCache {
    fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("capacity is at least 1");
        Self {
            store: RwLock::new(LruCache::new(capacity)),
            stats: RwLock::new(CacheStats::default()),
            default_ttl: config.default_ttl,
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }

    /// Look up `key`, refreshing LRU order on a live hit. An expired entry
    /// is purged in the same call and counted as a miss plus an eviction.
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut store = self.store.write();
        match store.get(key) {
            Some(entry) if entry.is_live() => {
                let entry = entry.clone();
                drop(store);
                self.stats.write().hits += 1;
                Some(entry)
            }
            Some(_) => {
                store.pop(key);
                drop(store);
                let mut stats = self.stats.write();
                stats.misses += 1;
                stats.evictions += 1;
                None
            }
            None => {
                drop(store);
                self.stats.write().misses += 1;
                None
            }
        }
    }

    /// Insert or replace `key`. Eviction of a different, least-recently-used
    /// key because of the capacity bound is counted separately from the
    /// expiry-driven eviction `get` performs.
    fn set(&self, key: String, entry: CacheEntry) {
        let mut store = self.store.write();
        let evicted_for_capacity = store.len() == store.cap().get() && !store.contains(&key);
        store.put(key, entry);
        drop(store);
        let mut stats = self.stats.write();
        stats.stores += 1;
        if evicted_for_capacity {
            stats.evictions += 1;
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// `"<METHOD>:<URL>"`, per `spec.md` §4.7. A `Vary`-aware key is a possible
/// future extension (`spec.md` §9) but isn't implemented: this crate caches
/// on method+URL only.
fn cache_key(request: &Request) -> String {
    format!("{}:{}", request.method(), request.url())
}

/// Parse `Cache-Control: max-age=N` / `no-store` / `no-cache` and
/// `Expires`, returning `(should_cache, expires_at_unix)`.
fn cache_directives(response: &Response, default_ttl: Option<Duration>) -> (bool, Option<u64>) {
    if !response.status().is_success() {
        return (false, None);
    }
    if let Some(cache_control) = response.header("cache-control") {
        let lower = cache_control.to_ascii_lowercase();
        if lower.contains("no-store") || lower.contains("no-cache") {
            return (false, None);
        }
        if let Some(max_age) = lower
            .split(',')
            .find_map(|part| part.trim().strip_prefix("max-age="))
            .and_then(|v| v.parse::<u64>().ok())
        {
            if max_age > 0 {
                return (true, Some(now_unix() + max_age));
            }
        }
    }
    if let Some(expires) = response.header("expires") {
        if let Ok(parsed) = httpdate::parse_http_date(expires) {
            let secs = parsed.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            return (true, Some(secs));
        }
    }
    match default_ttl {
        Some(ttl) => (true, Some(now_unix() + ttl.as_secs())),
        None => (true, None),
    }
}

/// Wires a [`ResponseCache`] into the chain per `spec.md` §4.7: eligible
/// requests with a live cached entry carry conditional headers but are
/// always forwarded — this middleware never answers from cache without a
/// round trip. A `304` reconstructs the cached `200`; otherwise a
/// cacheable response is stored for next time.
pub struct CacheMiddleware {
    cache: ResponseCache,
    cacheable_methods: HashSet<http::Method>,
    skip_cache_for: Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>,
}

impl CacheMiddleware {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            cacheable_methods: config.cacheable_methods.clone(),
            skip_cache_for: config.skip_cache_for.clone(),
            cache: ResponseCache::new(&config),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn eligible(&self, request: &Request) -> bool {
        self.cacheable_methods.contains(request.method())
            && !self.skip_cache_for.as_ref().is_some_and(|f| f(request))
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response> {
        if !self.eligible(&request) {
            return next.next(request).await;
        }

        let key = cache_key(&request);
        let entry = self.cache.get(&key);

        let mut outbound = request;
        if let Some(entry) = &entry {
            if let Some(etag) = &entry.etag {
                if let Ok(value) = http::HeaderValue::from_str(etag) {
                    outbound.set_header(http::header::IF_NONE_MATCH, value);
                }
            }
            if let Some(last_modified) = &entry.last_modified {
                if let Ok(value) = http::HeaderValue::from_str(last_modified) {
                    outbound.set_header(http::header::IF_MODIFIED_SINCE, value);
                }
            }
        }

        let response = next.next(outbound).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(match entry {
                Some(entry) => reconstruct(&entry),
                None => response,
            });
        }

        let (should_cache, expires_at) = cache_directives(&response, self.cache.default_ttl);
        if should_cache {
            let stored = CacheEntry {
                status: response.status(),
                headers: response.headers().clone(),
                body: response.bytes().clone(),
                expires_at,
                etag: response.header("etag").map(|s| s.to_string()),
                last_modified: response.header("last-modified").map(|s| s.to_string()),
            };
            self.cache.set(key, stored);
        }

        Ok(response)
    }
}

fn reconstruct(entry: &CacheEntry) -> Response {
    Response::new(
        entry.status,
        entry.headers.clone(),
        entry.body.clone(),
        url::Url::parse("http://cache.local/").unwrap(),
    )
}
