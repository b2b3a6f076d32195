//! Per-call cancellation and deadline handle.
//!
//! Every suspension point a stage can hit — the downstream call, a retry
//! backoff, a rate-limit wait, a breaker-adjacent lock — selects on this
//! handle so cancellation is observable within a bounded time (`spec.md`
//! §5).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::error::{ClientError, ErrorKind, Result};

/// Cancellation/deadline handle threaded through a single in-flight call.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    notify: Notify,
    cancelled: std::sync::atomic::AtomicBool,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context with no deadline, not cancelled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                notify: Notify::new(),
                cancelled: std::sync::atomic::AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// A context that is automatically considered cancelled once `timeout`
    /// elapses.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                notify: Notify::new(),
                cancelled: std::sync::atomic::AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    /// Mark the context cancelled and wake any waiters.
    pub fn cancel(&self) {
        self.inner
            .cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// `true` if cancelled explicitly or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            return true;
        }
        matches!(self.inner.deadline, Some(d) if Instant::now() >= d)
    }

    /// Time remaining before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Sleep for `duration`, bounded by cancellation or the deadline.
    /// Returns a `Timeout`-kind error if cancellation wins the race.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if self.is_cancelled() {
            return Err(ClientError::new(ErrorKind::Timeout, "context already cancelled"));
        }
        let duration = match self.remaining() {
            Some(remaining) => duration.min(remaining),
            None => duration,
        };
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled_signal() => Err(ClientError::new(ErrorKind::Timeout, "context cancelled while waiting")),
        }
    }

    async fn cancelled_signal(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let ctx = Context::new();
        ctx.sleep(Duration::from_millis(5)).await.unwrap();
    }

    #[tokio::test]
    async fn sleep_returns_error_when_cancelled() {
        let ctx = Context::new();
        let ctx2 = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx2.cancel();
        });
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn deadline_marks_cancelled_once_elapsed() {
        let ctx = Context::with_deadline(Duration::from_millis(5));
        assert!(!ctx.is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.is_cancelled());
    }
}
