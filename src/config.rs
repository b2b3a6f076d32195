//! Client-wide and per-request configuration, and the merge rule between
//! them (`spec.md` §3, §4.8).

use std::sync::Arc;
use std::time::Duration;

use crate::chain::Middleware;
use crate::cookie_jar::CookieJar;
use crate::middleware::cache::CacheConfig;
use crate::middleware::circuit_breaker::CircuitBreakerConfig;
use crate::middleware::compression::CompressionConfig;
use crate::middleware::rate_limit::RateLimitConfig;
use crate::middleware::retry::RetryPolicy;
use crate::request::BasicAuth;

/// Process-scoped, immutable after construction.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub default_headers: Vec<(String, String)>,
    pub default_basic_auth: Option<BasicAuthSpec>,
    pub retry_policy: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub cache: Option<CacheConfig>,
    pub compression: Option<CompressionConfig>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub proxy_url: Option<String>,
    pub no_proxy: Vec<String>,
    /// Shared, in-memory jar accumulating `Set-Cookie` responses and
    /// replaying them on later requests to the same host (`spec.md`
    /// §3/§5/§6). `None` disables jar-based cookie tracking entirely;
    /// per-request `RequestConfig::cookies` still work independently.
    pub cookie_jar: Option<CookieJar>,
}

/// Plain-text credential pair, the client-default counterpart to
/// `request::BasicAuth`.
#[derive(Debug, Clone)]
pub struct BasicAuthSpec {
    pub username: String,
    pub password: Option<String>,
}

impl From<BasicAuthSpec> for BasicAuth {
    fn from(spec: BasicAuthSpec) -> Self {
        BasicAuth {
            username: spec.username,
            password: spec.password,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            default_headers: Vec::new(),
            default_basic_auth: None,
            retry_policy: None,
            circuit_breaker: None,
            rate_limit: None,
            cache: None,
            compression: None,
            middlewares: Vec::new(),
            proxy_url: None,
            no_proxy: Vec::new(),
            cookie_jar: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Fluent builder for `ClientConfig`.
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn default_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.config.default_basic_auth = Some(BasicAuthSpec {
            username: username.into(),
            password,
        });
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = Some(config);
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = Some(config);
        self
    }

    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.config.compression = Some(config);
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.config.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(url.into());
        self
    }

    /// Enable jar-based cookie tracking, sharing `jar` so callers can
    /// inspect or seed it independently of the client.
    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.config.cookie_jar = Some(jar);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Per-call overrides. Any field left at its default inherits from the
/// client config via [`RequestConfig::merge_with`].
#[derive(Default, Clone)]
pub struct RequestConfig {
    /// Overriding base URL for this call. `path` (`spec.md` §6) isn't a
    /// separate field here: the verb methods (`HttpClient::get`, etc.)
    /// take the path/URL directly and `client::resolve_url` joins it
    /// against this `base_url` when it's relative.
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub query_params: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub basic_auth: Option<BasicAuthSpec>,
    pub streaming: bool,
    pub cookies: Vec<(String, String)>,
    pub disable_cookies: bool,
    pub proxy_url: Option<String>,
    pub disable_proxy: bool,
}

/// The fully-resolved view a stage consumes: the per-request config with
/// every absent field filled in from the client config. Non-destructive —
/// neither input is mutated.
#[derive(Clone)]
pub struct MergedConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<BasicAuthSpec>,
    pub streaming: bool,
    pub cookies: Vec<(String, String)>,
}

impl RequestConfig {
    /// Fold the client defaults into this per-request config, per
    /// `spec.md` §3's merge rule: missing fields inherit from the client;
    /// headers are unioned with request-specified keys winning; basic auth
    /// inherits only when the per-call credential is empty.
    pub fn merge_with(&self, client: &ClientConfig) -> MergedConfig {
        let base_url = self
            .base_url
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| client.base_url.clone());

        let timeout = self.timeout.unwrap_or(client.timeout);

        let mut headers = self.headers.clone();
        let present: std::collections::HashSet<String> =
            headers.iter().map(|(k, _)| k.to_ascii_lowercase()).collect();
        for (name, value) in &client.default_headers {
            if !present.contains(&name.to_ascii_lowercase()) {
                headers.push((name.clone(), value.clone()));
            }
        }

        let basic_auth = self
            .basic_auth
            .clone()
            .filter(|a| !a.username.is_empty())
            .or_else(|| client.default_basic_auth.clone());

        let cookies = if self.disable_cookies {
            Vec::new()
        } else {
            self.cookies.clone()
        };

        MergedConfig {
            base_url,
            timeout,
            headers,
            basic_auth,
            streaming: self.streaming,
            cookies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_headers_win_over_client_defaults() {
        let client = ClientConfig::builder()
            .default_header("X-Env", "prod")
            .default_header("X-Shared", "client")
            .build();

        let mut request = RequestConfig::default();
        request.headers.push(("X-Shared".into(), "request".into()));

        let merged = request.merge_with(&client);
        let shared = merged.headers.iter().find(|(k, _)| k == "X-Shared").unwrap();
        assert_eq!(shared.1, "request");
        assert!(merged.headers.iter().any(|(k, _)| k == "X-Env"));
    }

    #[test]
    fn empty_request_fields_inherit_client_config() {
        let client = ClientConfig::builder()
            .base_url("https://api.example.com")
            .timeout(Duration::from_secs(45))
            .build();

        let merged = RequestConfig::default().merge_with(&client);
        assert_eq!(merged.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(merged.timeout, Duration::from_secs(45));
    }

    #[test]
    fn merge_is_idempotent_for_a_fully_populated_request() {
        let client = ClientConfig::builder()
            .base_url("https://client.example.com")
            .default_header("X-Env", "prod")
            .build();

        let mut request = RequestConfig::default();
        request.base_url = Some("https://request.example.com".into());
        request.timeout = Some(Duration::from_secs(5));
        request.headers.push(("X-Request".into(), "1".into()));
        request.basic_auth = Some(BasicAuthSpec {
            username: "u".into(),
            password: Some("p".into()),
        });

        let first = request.merge_with(&client);

        let mut second_request = RequestConfig::default();
        second_request.base_url = Some(first.base_url.clone().unwrap());
        second_request.timeout = Some(first.timeout);
        second_request.headers = first.headers.clone();
        second_request.basic_auth = first.basic_auth.clone();

        let second = second_request.merge_with(&client);
        assert_eq!(second.base_url, first.base_url);
        assert_eq!(second.timeout, first.timeout);
        assert_eq!(second.headers.len(), first.headers.len());
    }
}
