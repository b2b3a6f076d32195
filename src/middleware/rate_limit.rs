//! Token-bucket rate limiter and its middleware: `DashMap`-keyed buckets
//! (key is either the request's host or a single global key), real-valued
//! token state refilled on access, plus advisory fields updated from
//! server-side rate-limit response headers.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::{ClientError, Result};
use crate::request::Request;
use crate::response::Response;

/// Per-key token bucket state.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    advisory_limit: Option<u64>,
    advisory_remaining: Option<u64>,
    advisory_reset_at: Option<u64>,
}

/// Token bucket limiter: real-valued tokens in `[0, capacity]`, refilled
/// continuously at `rate` tokens/sec (`spec.md` §3).
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
                advisory_limit: None,
                advisory_remaining: None,
                advisory_reset_at: None,
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Attempt to take a token. Returns `Ok(())` if admitted immediately,
    /// or `Err(wait)` with the duration a caller would need to wait.
    fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.state.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate);
            Err(wait)
        }
    }

    /// Consume a token unconditionally (called after a bounded wait),
    /// flooring at zero per `spec.md` §4.5 step 3.
    fn force_acquire(&self) {
        let mut bucket = self.state.lock();
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    fn update_advisory(&self, limit: Option<u64>, remaining: Option<u64>, reset_at: Option<u64>) {
        let mut bucket = self.state.lock();
        if limit.is_some() {
            bucket.advisory_limit = limit;
        }
        if remaining.is_some() {
            bucket.advisory_remaining = remaining;
        }
        if reset_at.is_some() {
            bucket.advisory_reset_at = reset_at;
        }
    }

    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }
}

/// Rate limit middleware configuration.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub rate: f64,
    pub per_host: bool,
    pub wait_on_limit: bool,
    /// `Some(Duration::ZERO)` and `None` both mean "fail fast", resolving
    /// the open question in `spec.md` §9 about `MaxWaitDuration = 0`: this
    /// crate treats a zero or absent max-wait as "do not wait, even if
    /// `wait_on_limit` is true" since a zero budget cannot honor any wait.
    pub max_wait_duration: Option<Duration>,
    /// Bound on 429 `Retry-After` re-executions (`spec.md` §9).
    pub max_429_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            rate: 5.0,
            per_host: false,
            wait_on_limit: true,
            max_wait_duration: Some(Duration::from_secs(5)),
            max_429_retries: 1,
        }
    }
}

/// Per-host (or global) registry of buckets, created lazily via
/// `DashMap::entry` — the concurrent-map `computeIfAbsent` the teacher's
/// `RetryMiddleware`-adjacent rewrite note (`spec.md` §9) calls for in
/// place of hand-rolled double-checked locking.
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn key_for(&self, request: &Request) -> String {
        if self.config.per_host {
            request.url().host_str().unwrap_or("unknown").to_string()
        } else {
            "global".to_string()
        }
    }

    fn bucket_for(&self, key: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.config.capacity, self.config.rate)))
            .clone()
    }

    async fn admit(&self, request: &Request, bucket: &TokenBucket) -> Result<()> {
        match bucket.try_acquire() {
            Ok(()) => Ok(()),
            Err(wait) => {
                let budget = self.config.max_wait_duration.unwrap_or(Duration::ZERO);
                if !self.config.wait_on_limit || budget.is_zero() {
                    return Err(ClientError::middleware("rate limit wait timeout exceeded"));
                }
                if wait > budget {
                    return Err(ClientError::middleware("rate limit wait timeout exceeded"));
                }
                request.context().sleep(wait).await?;
                bucket.force_acquire();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response> {
        let key = self.key_for(&request);
        let bucket = self.bucket_for(&key);

        self.admit(&request, &bucket).await?;

        let mut retries_left = self.config.max_429_retries;
        let mut current = request;
        loop {
            let response = next.next(current.clone()).await?;
            update_advisory_from_headers(&bucket, &response);

            if response.status().as_u16() != 429 || retries_left == 0 {
                return Ok(response);
            }

            match retry_after_seconds(&response) {
                Some(seconds) => {
                    let wait = Duration::from_secs(seconds);
                    let budget = self.config.max_wait_duration.unwrap_or(Duration::ZERO);
                    if wait > budget {
                        return Ok(response);
                    }
                    current.context().sleep(wait).await?;
                    retries_left -= 1;
                }
                None => return Ok(response),
            }
        }
    }
}

/// Parse `X-RateLimit-{Limit,Remaining,Reset}` and fold them into the
/// bucket's advisory fields; these never rewrite bucket internals
/// (`spec.md` §4.5).
fn update_advisory_from_headers(bucket: &TokenBucket, response: &Response) {
    let limit = response.header("x-ratelimit-limit").and_then(|v| v.parse().ok());
    let remaining = response.header("x-ratelimit-remaining").and_then(|v| v.parse().ok());
    let reset_at = response
        .header("x-ratelimit-reset")
        .and_then(parse_reset_header);
    if limit.is_some() || remaining.is_some() || reset_at.is_some() {
        bucket.update_advisory(limit, remaining, reset_at);
    }
}

fn parse_reset_header(value: &str) -> Option<u64> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    httpdate::parse_http_date(value)
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

fn retry_after_seconds(response: &Response) -> Option<u64> {
    response.header("retry-after").and_then(|v| v.parse::<u64>().ok())
}
