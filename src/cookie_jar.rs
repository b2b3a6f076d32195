//! A shared, in-memory cookie jar (`spec.md` §3/§5/§6). Disk persistence
//! is explicitly out of scope (`spec.md` §1); this only accumulates
//! `Set-Cookie` values across requests for the lifetime of the client and
//! hands them back out on later requests to the same host.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::request::Request;
use crate::response::Response;

/// A thread-safe handle, cloneable and shareable across every request a
/// client makes, keyed by host so cookies from one origin are never sent
/// to another. Mirrors the rate limiter's per-key `DashMap` registry.
#[derive(Clone, Default)]
pub struct CookieJar {
    by_host: Arc<DashMap<String, Arc<RwLock<HashMap<String, String>>>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookies currently stored for `host`, as `(name, value)` pairs in
    /// no particular order.
    pub fn cookies_for(&self, host: &str) -> Vec<(String, String)> {
        self.by_host
            .get(host)
            .map(|entry| entry.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Store a single cookie for `host`. A later call for the same name
    /// replaces the value — last write wins, no expiry or path tracking.
    pub fn store(&self, host: &str, name: String, value: String) {
        let entry = self
            .by_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone();
        entry.write().insert(name, value);
    }

    /// Drop every cookie stored for `host`.
    pub fn clear(&self, host: &str) {
        self.by_host.remove(host);
    }

    /// Attach this host's stored cookies onto an outbound request (folded
    /// into the `Cookie` header at send time by `Request::to_reqwest`).
    pub fn apply_to(&self, request: &mut Request) {
        let Some(host) = request.url().host_str().map(str::to_string) else { return };
        for (name, value) in self.cookies_for(&host) {
            request.add_cookie(name, value);
        }
    }

    /// Parse every `Set-Cookie` header on a response and store the
    /// resulting name/value pairs against the response URL's host.
    /// Attribute parameters (`Path`, `Domain`, `Max-Age`, `Secure`, ...)
    /// are ignored — only the leading `name=value` pair is kept.
    pub fn absorb(&self, response: &Response) {
        let Some(host) = response.url().host_str().map(str::to_string) else { return };
        for raw in response.headers().get_all(http::header::SET_COOKIE) {
            let Ok(raw) = raw.to_str() else { continue };
            if let Some((name, value)) = parse_set_cookie_pair(raw) {
                self.store(&host, name, value);
            }
        }
    }
}

fn parse_set_cookie_pair(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?.trim();
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};

    #[test]
    fn absorbs_set_cookie_and_applies_it_to_a_later_request_to_the_same_host() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::SET_COOKIE,
            "session=abc123; Path=/; HttpOnly".parse().unwrap(),
        );
        let response = Response::new(
            StatusCode::OK,
            headers,
            bytes::Bytes::new(),
            url::Url::parse("http://example.test/login").unwrap(),
        );
        jar.absorb(&response);

        let mut request = Request::parse(http::Method::GET, "http://example.test/profile").unwrap();
        jar.apply_to(&mut request);
        assert_eq!(request.cookies(), &[("session".to_string(), "abc123".to_string())]);
    }

    #[test]
    fn cookies_are_not_leaked_across_hosts() {
        let jar = CookieJar::new();
        jar.store("a.test", "x".to_string(), "1".to_string());

        let mut request = Request::parse(http::Method::GET, "http://b.test/").unwrap();
        jar.apply_to(&mut request);
        assert!(request.cookies().is_empty());
    }

    #[test]
    fn a_later_set_cookie_for_the_same_name_replaces_the_value() {
        let jar = CookieJar::new();
        jar.store("example.test", "theme".to_string(), "light".to_string());
        jar.store("example.test", "theme".to_string(), "dark".to_string());
        assert_eq!(jar.cookies_for("example.test"), vec![("theme".to_string(), "dark".to_string())]);
    }
}
