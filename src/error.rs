//! Error taxonomy shared by every stage of the client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// The canonical error kind. Every failure surfaced by the chain carries
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DNS, connection, or other transport-level failure.
    Network,
    /// A deadline or context timeout elapsed.
    Timeout,
    /// The response carried a 4xx status.
    Client,
    /// The response carried a 5xx status.
    Server,
    /// A request or configuration failed validation (bad URL, bad header).
    Validation,
    /// A stage rejected the call on its own terms (breaker open, rate limit
    /// wait exceeded, decompression failure).
    Middleware,
    /// Nothing above applies.
    Unknown,
}

/// Wraps the type-erased cause so it can sit behind `thiserror`'s
/// `#[source]`, which needs a field that implements `std::error::Error`
/// itself rather than an `Arc<dyn Error>` (no blanket impl for `Arc` in
/// `std`, unlike `Box`).
#[derive(Clone)]
struct Cause(Arc<dyn std::error::Error + Send + Sync>);

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Cause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// A downstream-forced retry suggestion: `spec.md` §4.3's `Retryable(err,
/// after)` wrapper, attached to an error rather than a separate type, so
/// any error — not just ones the retry middleware itself produces — can
/// carry a minimum delay the retry stage must honor.
#[derive(Debug, Clone, Copy)]
pub struct RetryHint {
    pub after: Duration,
}

/// A single error value carrying one kind, a message, an optional status
/// code, and an optional cause. Equality is by `(kind, status_code)`.
///
/// The `Display` format depends on whether `status_code` is set, which
/// doesn't fit a literal `#[error("...")]` template, so the rendering is
/// delegated to a method; `thiserror` still derives `source()` from the
/// `#[source]` field.
#[derive(Debug, thiserror::Error)]
#[error("{}", self.render())]
pub struct ClientError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    retry_hint: Option<RetryHint>,
    #[source]
    cause: Option<Cause>,
}

impl ClientError {
    fn render(&self) -> String {
        match self.status_code {
            Some(status) => format!("{:?} ({}): {}", self.kind, status, self.message),
            None => format!("{:?}: {}", self.kind, self.message),
        }
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.status_code == other.status_code
    }
}

impl ClientError {
    /// Build an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retry_hint: None,
            cause: None,
        }
    }

    /// Attach a status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attach a suggested minimum retry delay (`spec.md` §4.3). The retry
    /// middleware, if this error reaches it, waits at least `hint.after`
    /// before the next attempt, on top of whatever its own backoff policy
    /// computes.
    pub fn with_retry_hint(mut self, hint: RetryHint) -> Self {
        self.retry_hint = Some(hint);
        self
    }

    /// The suggested minimum retry delay, if one was attached.
    pub fn retry_hint(&self) -> Option<RetryHint> {
        self.retry_hint
    }

    /// Attach a cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Cause(Arc::new(cause)));
        self
    }

    /// Construct a `Middleware`-kind error, the kind self-imposed stage
    /// faults use (breaker rejection, rate-limit wait timeout, decompression
    /// garbage).
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Middleware, message)
    }

    /// Construct a `Timeout`-kind error.
    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, format!("timed out after {:?}", after))
    }

    /// Construct a `Validation`-kind error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The HTTP status code, if one is associated with this error.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Walk to the innermost cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.cause.as_ref().map(|c| c.0.as_ref())
    }

    /// `true` for `Network` kind.
    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    /// `true` for `Timeout` kind.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// `true` for `Client` kind (4xx).
    pub fn is_client(&self) -> bool {
        self.kind == ErrorKind::Client
    }

    /// `true` for `Server` kind (5xx).
    pub fn is_server(&self) -> bool {
        self.kind == ErrorKind::Server
    }

    /// `true` for `Validation` kind.
    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    /// `true` for `Middleware` kind.
    pub fn is_middleware(&self) -> bool {
        self.kind == ErrorKind::Middleware
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_connect() {
            ErrorKind::Network
        } else if let Some(status) = e.status() {
            classify_status(status.as_u16()).unwrap_or(ErrorKind::Unknown)
        } else {
            ErrorKind::Unknown
        };
        let status_code = e.status().map(|s| s.as_u16());
        Self {
            kind,
            message: e.to_string(),
            status_code,
            retry_hint: None,
            cause: Some(Cause(Arc::new(e))),
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string()).with_cause(e)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        let kind = classify_message(&e.to_string()).unwrap_or(ErrorKind::Unknown);
        Self::new(kind, e.to_string()).with_cause(e)
    }
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    if (400..500).contains(&status) {
        Some(ErrorKind::Client)
    } else if status >= 500 {
        Some(ErrorKind::Server)
    } else {
        None
    }
}

/// Probe a free-text message for network/timeout substrings, per the
/// classifier's priority 4 in `spec.md` §4.2.
fn classify_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_ascii_lowercase();
    const TIMEOUT_MARKERS: &[&str] = &["timeout", "deadline exceeded", "timed out"];
    const NETWORK_MARKERS: &[&str] = &[
        "connection refused",
        "no such host",
        "network unreachable",
        "connection reset",
        "broken pipe",
        "dial tcp",
        "dial udp",
        "dns",
    ];
    if TIMEOUT_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ErrorKind::Timeout);
    }
    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ErrorKind::Network);
    }
    None
}

/// The classifier described in `spec.md` §4.2: given an error, an optional
/// response status, and the error's own message, pick exactly one kind.
pub fn classify(err: &ClientError, response_status: Option<u16>) -> ErrorKind {
    if let Some(status) = response_status {
        if let Some(kind) = classify_status(status) {
            return kind;
        }
    }
    if err.kind != ErrorKind::Unknown {
        return err.kind;
    }
    classify_message(&err.message).unwrap_or(ErrorKind::Unknown)
}
