//! Request/response interceptors, composed into a single chain stage.
//!
//! `Interceptor`, `LoggingInterceptor`, and `AuthInterceptor` wrap
//! `Request`/`Response` with pass-through defaults. Header-parsing
//! failures return a typed error rather than panicking — a stray header
//! value should fail the call, not the process — and `InterceptorStage`
//! folds any such failure into a `Middleware`-kind short-circuit per
//! `spec.md` §4.1.

use async_trait::async_trait;
use base64::Engine;
use http::{HeaderName, HeaderValue};

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::{ClientError, Result};
use crate::request::Request;
use crate::response::Response;

/// An interceptor sees both sides of the exchange, plus a downstream
/// failure; any method may be left at its pass-through default
/// (`spec.md` §6: `beforeRequest`/`afterResponse`/`onError`).
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept_request(&self, request: Request) -> Result<Request> {
        Ok(request)
    }

    async fn intercept_response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }

    /// Observe (and optionally replace) an error the downstream chain
    /// produced. Default pass-through returns `err` unchanged.
    async fn intercept_error(&self, err: ClientError) -> ClientError {
        err
    }
}

/// Logs method/URL/status at `debug`, and headers at `trace` when enabled
/// — the same two-tier density as the rest of this crate's stages.
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self { log_headers: false }
    }

    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept_request(&self, request: Request) -> Result<Request> {
        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");
        if self.log_headers {
            for (name, value) in request.headers() {
                tracing::trace!(header = %name, value = ?value, "request header");
            }
        }
        Ok(request)
    }

    async fn intercept_response(&self, response: Response) -> Result<Response> {
        tracing::debug!(status = %response.status(), "received response");
        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(header = %name, value = ?value, "response header");
            }
        }
        Ok(response)
    }
}

enum AuthType {
    Bearer(String),
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

/// Injects an `Authorization` (or arbitrary API-key) header on every
/// request. A separate concern from `Request::basic_auth`, which is
/// merged in from `ClientConfig`/`RequestConfig` instead — this exists
/// for bearer tokens and custom API-key headers, which have no dedicated
/// config field.
pub struct AuthInterceptor {
    auth_type: AuthType,
}

impl AuthInterceptor {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { auth_type: AuthType::Bearer(token.into()) }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Basic {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::ApiKey {
                header: header.into(),
                key: key.into(),
            },
        }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept_request(&self, mut request: Request) -> Result<Request> {
        let (name, value) = match &self.auth_type {
            AuthType::Bearer(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| ClientError::validation(format!("invalid bearer token: {e}")))?;
                (http::header::AUTHORIZATION, value)
            }
            AuthType::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
                let value = HeaderValue::from_str(&format!("Basic {encoded}"))
                    .map_err(|e| ClientError::validation(format!("invalid basic auth value: {e}")))?;
                (http::header::AUTHORIZATION, value)
            }
            AuthType::ApiKey { header, key } => {
                let name = HeaderName::from_bytes(header.as_bytes())
                    .map_err(|e| ClientError::validation(format!("invalid header name '{header}': {e}")))?;
                let value = HeaderValue::from_str(key)
                    .map_err(|e| ClientError::validation(format!("invalid api key value: {e}")))?;
                (name, value)
            }
        };
        request.set_header(name, value);
        Ok(request)
    }
}

/// Logs (but does not act on) a `429` response's `Retry-After` — the rate
/// limit middleware owns the actual bounded re-execution; this is purely
/// observational, for callers who wire it in without the rate limiter.
pub struct RateLimitHintInterceptor;

#[async_trait]
impl Interceptor for RateLimitHintInterceptor {
    async fn intercept_response(&self, response: Response) -> Result<Response> {
        if response.status() == http::StatusCode::TOO_MANY_REQUESTS {
            if let Some(seconds) = response.header("retry-after").and_then(|v| v.parse::<u64>().ok()) {
                tracing::warn!(retry_after_seconds = seconds, "rate limited by server");
            }
        }
        Ok(response)
    }
}

/// Wires an ordered list of [`Interceptor`]s into the chain as a single
/// stage: request interceptors run in order before `next`, response
/// interceptors run in the same order after it returns, and error
/// interceptors run in the same order over whatever the downstream chain
/// failed with.
pub struct InterceptorStage {
    interceptors: Vec<std::sync::Arc<dyn Interceptor>>,
}

impl InterceptorStage {
    pub fn new(interceptors: Vec<std::sync::Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }
}

#[async_trait]
impl Middleware for InterceptorStage {
    fn name(&self) -> &str {
        "interceptors"
    }

    async fn handle(&self, mut request: Request, next: &MiddlewareChain) -> Result<Response> {
        for interceptor in &self.interceptors {
            request = match interceptor.intercept_request(request).await {
                Ok(request) => request,
                // `spec.md` §4.1: a failing pre-request hook short-circuits
                // the chain with a `Middleware` error, regardless of the
                // kind the hook itself raised.
                Err(err) => {
                    return Err(ClientError::middleware(format!(
                        "interceptor '{}' rejected the request: {err}",
                        interceptor_label(interceptor.as_ref())
                    )))
                }
            };
        }

        let outcome = next.next(request).await;
        let mut response = match outcome {
            Ok(response) => response,
            Err(mut err) => {
                for interceptor in &self.interceptors {
                    err = interceptor.intercept_error(err).await;
                }
                return Err(err);
            }
        };

        for interceptor in &self.interceptors {
            response = interceptor.intercept_response(response).await?;
        }

        Ok(response)
    }
}

/// Best-effort label for an interceptor's error-message context. Interceptors
/// carry no `name()` of their own (unlike [`Middleware`]); a type name is
/// precise enough for a log line and doesn't require adding a new trait
/// method every interceptor implementation would need to fill in.
fn interceptor_label(interceptor: &dyn Interceptor) -> &'static str {
    std::any::type_name_of_val(interceptor)
        .rsplit("::")
        .next()
        .unwrap_or("interceptor")
}
