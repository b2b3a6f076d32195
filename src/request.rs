//! The outbound request, owned exclusively by a single in-flight call.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::context::Context;
use crate::error::{ClientError, Result};

/// Basic auth credentials.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// A single outbound HTTP exchange, request side.
///
/// Clonable: retry re-executes against a clone, per `spec.md` §3 and §4.3.
/// The body is always buffered in memory, which is the single rule this
/// crate picked for the open question in `spec.md` §9 about retrying a
/// request whose body a prior middleware has already partially consumed —
/// buffering at construction means there is nothing left to partially
/// consume.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: url::Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<std::time::Duration>,
    cookies: Vec<(String, String)>,
    basic_auth: Option<BasicAuth>,
    streaming: bool,
    ctx: Context,
}

impl Request {
    /// Build a new request. The body, if any, must already be in memory.
    pub fn new(method: Method, url: url::Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cookies: Vec::new(),
            basic_auth: None,
            streaming: false,
            ctx: Context::new(),
        }
    }

    /// Parse `url` and build a request, surfacing a `Validation` error on
    /// a malformed URL.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)?;
        Ok(Self::new(method, parsed))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut url::Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Insert a header, replacing any existing value(s) for that name.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Insert a header only if it is not already present — the rule
    /// `spec.md` §3's "merge rule" requires for client-default headers.
    pub fn set_header_if_absent(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.headers.contains_key(&name) {
            self.headers.insert(name, value);
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    pub fn clear_body(&mut self) {
        self.body = None;
    }

    /// The body length if known, mirroring the ambiguous `ContentLength`
    /// the compression middleware's request path reads (`spec.md` §9's
    /// first open question: unknown length means "skip", which is what
    /// `None` means here since every body is buffered).
    pub fn content_length(&self) -> Option<usize> {
        self.body.as_ref().map(|b| b.len())
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.timeout = Some(timeout);
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.push((name.into(), value.into()));
    }

    pub fn basic_auth(&self) -> Option<&BasicAuth> {
        self.basic_auth.as_ref()
    }

    pub fn set_basic_auth(&mut self, auth: BasicAuth) {
        self.basic_auth = Some(auth);
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn set_context(&mut self, ctx: Context) {
        self.ctx = ctx;
    }

    /// Build the `reqwest::Request` the terminal sender actually executes.
    pub(crate) fn to_reqwest(&self, client: &reqwest::Client) -> Result<reqwest::Request> {
        let mut builder = client.request(self.method.clone(), self.url.clone());
        builder = builder.headers(self.headers.clone());
        if !self.cookies.is_empty() && !self.headers.contains_key(http::header::COOKIE) {
            let cookie_header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(value) = HeaderValue::from_str(&cookie_header) {
                builder = builder.header(http::header::COOKIE, value);
            }
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(auth) = &self.basic_auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_ref());
        }
        builder
            .build()
            .map_err(|e| ClientError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_folded_into_a_single_cookie_header() {
        let client = reqwest::Client::new();
        let mut request = Request::parse(Method::GET, "http://example.test/").unwrap();
        request.add_cookie("session", "abc123");
        request.add_cookie("theme", "dark");

        let built = request.to_reqwest(&client).unwrap();
        let cookie_header = built.headers().get(http::header::COOKIE).unwrap();
        assert_eq!(cookie_header, "session=abc123; theme=dark");
    }

    #[test]
    fn an_explicit_cookie_header_is_not_overwritten() {
        let client = reqwest::Client::new();
        let mut request = Request::parse(Method::GET, "http://example.test/").unwrap();
        request.add_cookie("session", "abc123");
        request.set_header(http::header::COOKIE, HeaderValue::from_static("custom=1"));

        let built = request.to_reqwest(&client).unwrap();
        assert_eq!(built.headers().get(http::header::COOKIE).unwrap(), "custom=1");
    }
}
