//! The inbound response, mutable by middlewares after the terminal call.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ClientError, ErrorKind, Result};

/// A single outbound HTTP exchange, response side.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: url::Url,
}

impl Response {
    /// Construct a response directly (used by the cache middleware to
    /// reconstruct a `304` into the cached `200`, per `spec.md` §4.7).
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, url: url::Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
        }
    }

    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(ClientError::from)?;
        Ok(Self {
            status,
            headers,
            body,
            url,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).and_then(|v| v.to_str().ok())
    }

    pub fn set_header(&mut self, name: http::HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: impl AsRef<str>) {
        self.headers.remove(name.as_ref());
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| ClientError::new(ErrorKind::Unknown, e.to_string()))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::new(ErrorKind::Unknown, e.to_string()))
    }

    /// The `Content-Length` header, parsed, falling back to the body's
    /// actual length once a body is present (the crate always has a body
    /// in memory by the time this is asked, see `spec.md` §3).
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or(Some(self.body.len() as u64))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Classify a non-2xx status into the taxonomy's `Client`/`Server`
    /// error, or `None` if the response is successful.
    pub fn error_for_status(&self) -> Option<ClientError> {
        if self.status.is_client_error() {
            Some(ClientError::new(ErrorKind::Client, "client error response").with_status(self.status.as_u16()))
        } else if self.status.is_server_error() {
            Some(ClientError::new(ErrorKind::Server, "server error response").with_status(self.status.as_u16()))
        } else {
            None
        }
    }
}
