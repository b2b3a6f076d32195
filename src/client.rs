//! Top-level client: wires [`ClientConfig`] into a [`MiddlewareChain`]
//! and exposes the per-verb builder surface.

use http::Method;
use std::sync::Arc;

use crate::chain::{MiddlewareChain, ReqwestSender, TerminalSender};
use crate::config::{ClientConfig, MergedConfig, RequestConfig};
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::interceptor::InterceptorStage;
use crate::middleware::cache::CacheMiddleware;
use crate::middleware::circuit_breaker::CircuitBreakerMiddleware;
use crate::middleware::compression::CompressionMiddleware;
use crate::middleware::rate_limit::RateLimitMiddleware;
use crate::middleware::retry::RetryMiddleware;
use crate::request::Request;
use crate::response::Response;

/// The assembled client: immutable configuration plus the chain built
/// from it once at construction.
///
/// The stage order (outermost first) is: interceptors, cache, rate limit,
/// retry, circuit breaker, compression, terminal. Cache sits outside the
/// rate limiter so a cache hit never consumes a token; retry sits outside
/// the circuit breaker so every attempt it replays is separately admitted
/// and completed, rather than the breaker seeing one admission for the
/// whole retry loop; compression sits innermost, closest to the wire.
#[derive(Clone)]
pub struct HttpClient {
    config: Arc<ClientConfig>,
    chain: MiddlewareChain,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Self {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy_url) = &config.proxy_url {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let reqwest_client = builder.build().expect("failed to build transport client");
        Self::with_transport(config, reqwest_client)
    }

    /// Build a client over a caller-supplied `reqwest::Client` — useful
    /// for tests that need to point at a mock server's connector.
    pub fn with_transport(config: ClientConfig, transport: reqwest::Client) -> Self {
        let terminal: Arc<dyn TerminalSender> = Arc::new(ReqwestSender::new(transport));
        let chain = build_chain(&config, terminal);
        Self {
            config: Arc::new(config),
            chain,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::GET, url.into())
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::POST, url.into())
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::PUT, url.into())
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::PATCH, url.into())
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::DELETE, url.into())
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, Method::HEAD, url.into())
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self, method, url.into())
    }

    /// Run a fully-built [`Request`] through the chain.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let response = self.chain.execute(request).await?;
        if let Some(jar) = &self.config.cookie_jar {
            jar.absorb(&response);
        }
        Ok(response)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

/// Resolve the URL a verb method was called with against the merged
/// `base_url` (`spec.md` §3/§6: a request's overriding base URL is joined
/// with its path when the call site gave a relative path). An absolute
/// URL passed to `get`/`post`/etc. is used as-is; only a relative one
/// requires `base_url` to be present.
fn resolve_url(raw: &str, base_url: Option<&str>) -> Result<url::Url> {
    match url::Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base_url.ok_or_else(|| {
                ClientError::validation(format!("relative path '{raw}' requires a configured base_url"))
            })?;
            let base = url::Url::parse(base)?;
            Ok(base.join(raw)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn build_chain(config: &ClientConfig, terminal: Arc<dyn TerminalSender>) -> MiddlewareChain {
    let mut stages: Vec<Arc<dyn crate::chain::Middleware>> = Vec::new();

    stages.extend(config.middlewares.iter().cloned());

    if let Some(cache_config) = &config.cache {
        stages.push(Arc::new(CacheMiddleware::new(cache_config.clone())));
    }
    if let Some(rate_limit_config) = &config.rate_limit {
        stages.push(Arc::new(RateLimitMiddleware::new(rate_limit_config.clone())));
    }
    if let Some(retry_policy) = &config.retry_policy {
        stages.push(Arc::new(RetryMiddleware::new(retry_policy.clone())));
    }
    if let Some(cb_config) = &config.circuit_breaker {
        stages.push(Arc::new(CircuitBreakerMiddleware::new(cb_config.clone())));
    }
    if let Some(compression_config) = &config.compression {
        stages.push(Arc::new(CompressionMiddleware::new(compression_config.clone())));
    }

    MiddlewareChain::new(stages, terminal)
}

/// Thin, fluent collaborator that assembles a [`Request`] and a
/// [`RequestConfig`] before handing both to [`HttpClient::execute`]:
/// header/query/body/timeout/auth setters and a terminal `send`.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: String,
    request_config: RequestConfig,
    body: Option<bytes::Bytes>,
    headers: Vec<(String, http::HeaderValue)>,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            request_config: RequestConfig::default(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_config.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_config.query_params.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_config.timeout = Some(timeout);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.request_config.basic_auth = Some(crate::config::BasicAuthSpec {
            username: username.into(),
            password,
        });
        self
    }

    pub fn body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value).map_err(|e| ClientError::validation(e.to_string()))?;
        self.headers.push((
            "content-type".to_string(),
            http::HeaderValue::from_static("application/json"),
        ));
        self.body = Some(bytes::Bytes::from(encoded));
        Ok(self)
    }

    async fn build_request(self) -> Result<Request> {
        let merged: MergedConfig = self.request_config.merge_with(self.client.config());

        let mut url = resolve_url(&self.url, merged.base_url.as_deref())?;
        for (name, value) in &self.request_config.query_params {
            url.query_pairs_mut().append_pair(name, value);
        }

        let mut request = Request::new(self.method, url);
        for (name, value) in merged.headers {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(&value),
            ) {
                request.set_header(name, value);
            }
        }
        for (name, value) in self.headers {
            if let Ok(name) = http::HeaderName::from_bytes(name.as_bytes()) {
                request.set_header(name, value);
            }
        }
        if let Some(body) = self.body {
            request.set_body(body);
        }
        request.set_timeout(merged.timeout);
        if let Some(auth) = merged.basic_auth {
            request.set_basic_auth(auth.into());
        }
        for (name, value) in merged.cookies {
            request.add_cookie(name, value);
        }
        if !self.request_config.disable_cookies {
            if let Some(jar) = &self.client.config().cookie_jar {
                jar.apply_to(&mut request);
            }
        }
        if self.request_config.streaming {
            request.set_streaming(true);
        }
        request.set_context(Context::with_deadline(merged.timeout));
        Ok(request)
    }

    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        let request = self.build_request().await?;
        client.execute(request).await
    }
}

/// Build the default interceptor stage most applications want: request
/// and response logging. Callers who need auth or custom interceptors
/// build their own [`InterceptorStage`] and pass it to
/// [`crate::config::ClientConfigBuilder::middleware`].
pub fn default_interceptor_stage() -> InterceptorStage {
    InterceptorStage::new(vec![Arc::new(crate::interceptor::LoggingInterceptor::new())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_builds_without_panicking() {
        let client = HttpClient::default();
        assert!(client.config().base_url.is_none());
    }

    #[tokio::test]
    async fn request_builder_applies_headers_and_query() {
        let client = HttpClient::default();
        let builder = client.get("http://example.test/path").header("X-Test", "1").query("q", "rust");
        let request = builder.build_request().await.unwrap();
        assert_eq!(request.url().query(), Some("q=rust"));
        assert_eq!(request.headers().get("x-test").unwrap(), "1");
    }

    #[tokio::test]
    async fn relative_path_resolves_against_configured_base_url() {
        let config = ClientConfig::builder().base_url("https://api.example.com/v1/").build();
        let client = HttpClient::new(config);
        let request = client.get("users/42").build_request().await.unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/users/42");
    }

    #[tokio::test]
    async fn relative_path_without_base_url_is_a_validation_error() {
        let client = HttpClient::default();
        let err = client.get("users/42").build_request().await.unwrap_err();
        assert!(err.is_validation());
    }
}
