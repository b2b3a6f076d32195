//! # Waypoint HTTP
//!
//! A resilient HTTP client framework built around a composable middleware
//! pipeline: retry with backoff, circuit breaking, token-bucket rate
//! limiting, conditional response caching, and transparent compression.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use waypoint_http::{HttpClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(ClientConfig::default());
//!
//!     let response = client.get("https://api.example.com/users").send().await?;
//!     println!("status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## With retry and a circuit breaker
//!
//! ```rust,no_run
//! use waypoint_http::{ClientConfig, HttpClient};
//! use waypoint_http::middleware::{CircuitBreakerConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .timeout(Duration::from_secs(30))
//!         .retry(RetryPolicy::exponential(3, Duration::from_millis(100)))
//!         .circuit_breaker(CircuitBreakerConfig::default())
//!         .build();
//!
//!     let client = HttpClient::new(config);
//!     let response = client.post("https://api.example.com/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))?
//!         .send()
//!         .await?;
//!     let _ = response;
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod client;
pub mod config;
pub mod context;
pub mod cookie_jar;
pub mod error;
pub mod interceptor;
pub mod middleware;
pub mod request;
pub mod response;

pub use chain::{Middleware, MiddlewareChain, ReqwestSender, TerminalSender};
pub use client::{HttpClient, RequestBuilder};
pub use config::{BasicAuthSpec, ClientConfig, ClientConfigBuilder, MergedConfig, RequestConfig};
pub use cookie_jar::CookieJar;
pub use context::Context;
pub use error::{ClientError, ErrorKind, Result, RetryHint};
pub use interceptor::{AuthInterceptor, Interceptor, InterceptorStage, LoggingInterceptor, RateLimitHintInterceptor};
pub use request::{BasicAuth, Request};
pub use response::Response;

// Re-export common wire types so consumers don't need a direct `http`
// dependency for everyday use.
pub use bytes::Bytes;
pub use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use waypoint_http::prelude::*;
/// ```
pub mod prelude {
    pub use crate::chain::{Middleware, MiddlewareChain};
    pub use crate::client::{HttpClient, RequestBuilder};
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::error::{ClientError, ErrorKind, Result};
    pub use crate::interceptor::{AuthInterceptor, Interceptor, LoggingInterceptor};
    pub use crate::request::Request;
    pub use crate::response::Response;
    pub use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
}
