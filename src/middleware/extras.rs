//! Optional plug-in middlewares, supplementing the five hard stateful
//! stages with two general-purpose ones: a request-ID tagger and a
//! metrics callback stage. Neither is part of the pipeline by default —
//! register them via [`crate::config::ClientConfigBuilder::middleware`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Tags every outbound request with a unique header, generated from a
/// nanosecond timestamp rather than a UUID dependency the rest of the
/// stack has no other use for.
pub struct RequestIdMiddleware {
    header_name: String,
}

impl RequestIdMiddleware {
    pub fn new() -> Self {
        Self { header_name: "x-request-id".to_string() }
    }

    pub fn with_header(header: impl Into<String>) -> Self {
        Self { header_name: header.into() }
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn handle(&self, mut request: Request, next: &MiddlewareChain) -> Result<Response> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let request_id = format!("{nanos:x}");

        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(self.header_name.as_bytes()),
            http::HeaderValue::from_str(&request_id),
        ) {
            request.set_header(name, value);
        }

        next.next(request).await
    }
}

/// Callback fired once per exchange with `(method, url, status, duration)`;
/// `status` is `0` when the call never produced a response.
pub type MetricsCallback = Arc<dyn Fn(&str, &str, u16, Duration) + Send + Sync>;

/// Records call timing via an injected callback — the hook point named
/// "metrics" in the pipeline's list of cross-cutting concerns, without
/// committing this crate to a specific metrics backend.
pub struct MetricsMiddleware {
    on_complete: MetricsCallback,
}

impl MetricsMiddleware {
    pub fn new<F>(on_complete: F) -> Self
    where
        F: Fn(&str, &str, u16, Duration) + Send + Sync + 'static,
    {
        Self { on_complete: Arc::new(on_complete) }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response> {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let start = Instant::now();

        let result = next.next(request).await;
        let elapsed = start.elapsed();

        let status = match &result {
            Ok(response) => response.status().as_u16(),
            Err(_) => 0,
        };
        (self.on_complete)(&method, &url, status, elapsed);

        result
    }
}
