//! Retry middleware: backoff strategies plus a chain stage that replays
//! a request up to a configured number of attempts, honoring a
//! per-policy retry condition and an `ExponentialJitter` strategy
//! alongside the fixed/linear/exponential ones.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::{ClientError, ErrorKind, Result};
use crate::request::Request;
use crate::response::Response;

/// Backoff strategy driving the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

/// Retry policy. `max_attempts` counts total attempts, not extra retries.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub multiplier: f64,
    pub jitter_max: Duration,
    pub retryable_statuses: HashSet<u16>,
    pub retryable_kinds: HashSet<ErrorKind>,
    pub condition: Option<Arc<dyn Fn(u32, Option<&ClientError>, Option<&Response>) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("multiplier", &self.multiplier)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            jitter_max: Duration::from_millis(100),
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retryable_kinds: [ErrorKind::Network, ErrorKind::Timeout, ErrorKind::Server].into_iter().collect(),
            condition: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            strategy: BackoffStrategy::Fixed,
            ..Default::default()
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            strategy: BackoffStrategy::Linear,
            ..Default::default()
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            strategy: BackoffStrategy::Exponential,
            ..Default::default()
        }
    }

    pub fn exponential_jitter(max_attempts: u32, base_delay: Duration, jitter_max: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter_max,
            strategy: BackoffStrategy::ExponentialJitter,
            ..Default::default()
        }
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(u32, Option<&ClientError>, Option<&Response>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Delay before attempt number `attempt` (0-indexed retries, i.e. the
    /// delay taken *after* that attempt failed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.mul_f64((attempt + 1) as f64 * self.multiplier),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialJitter => {
                self.base_delay.mul_f64(self.multiplier.powi(attempt as i32))
            }
        };
        let base = base.min(self.max_delay);
        if self.strategy == BackoffStrategy::ExponentialJitter && !self.jitter_max.is_zero() {
            let jitter_millis = jitter_millis(self.jitter_max.as_millis() as u64);
            (base + Duration::from_millis(jitter_millis)).min(self.max_delay)
        } else {
            base
        }
    }

    /// Whether the outcome of `attempt` should be retried, honoring either
    /// the explicit `condition` or the configured status/kind sets.
    fn should_retry(&self, attempt: u32, error: Option<&ClientError>, response: Option<&Response>) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        if let Some(condition) = &self.condition {
            return condition(attempt, error, response);
        }
        if let Some(err) = error {
            return self.retryable_kinds.contains(&err.kind());
        }
        if let Some(resp) = response {
            return self.retryable_statuses.contains(&resp.status().as_u16());
        }
        false
    }
}

/// Draws jitter in `[0, max_millis)` from a cryptographically strong
/// source; falls back to zero jitter if generation fails, so a jitter
/// failure never fails the request (`spec.md` §4.3).
fn jitter_millis(max_millis: u64) -> u64 {
    if max_millis == 0 {
        return 0;
    }
    rand::rng().random_range(0..max_millis)
}

/// The retry stage: attempts `next` up to `max_attempts` times, cloning the
/// request for each try, waiting between attempts on the request's own
/// context so cancellation is honored.
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response> {
        let mut attempt = 0u32;

        loop {
            let attempt_request = request.clone();
            let ctx = attempt_request.context().clone();
            let last_outcome = next.next(attempt_request).await;

            let should_retry = match &last_outcome {
                Ok(response) => self.policy.should_retry(attempt, None, Some(response)),
                Err(err) if err.is_timeout() && ctx.is_cancelled() => false,
                Err(err) => self.policy.should_retry(attempt, Some(err), None),
            };

            if !should_retry {
                return last_outcome;
            }

            let mut delay = self.policy.delay_for_attempt(attempt);
            // `spec.md` §4.3: an error carrying a `RetryHint` forces at
            // least its suggested delay, on top of the policy's own backoff.
            if let Err(err) = &last_outcome {
                if let Some(hint) = err.retry_hint() {
                    delay = delay.max(hint.after);
                }
            }
            if !delay.is_zero() {
                ctx.sleep(delay).await?;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_each_attempt() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn fixed_backoff_never_changes() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(50));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let mut policy = RetryPolicy::exponential(10, Duration::from_millis(100));
        policy.max_delay = Duration::from_millis(300);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(300));
    }

    #[test]
    fn last_attempt_is_never_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        assert!(!policy.should_retry(2, None, None));
        assert!(policy.should_retry(1, Some(&ClientError::new(ErrorKind::Server, "x")), None));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_advances_virtual_time_without_real_sleeps() {
        use crate::chain::{MiddlewareChain, TerminalSender};
        use crate::response::Response;
        use http::{Method, StatusCode};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct FlakyTerminal {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl TerminalSender for FlakyTerminal {
            async fn send(&self, _ctx: &crate::context::Context, request: Request) -> Result<Response> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Ok(Response::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        http::HeaderMap::new(),
                        bytes::Bytes::new(),
                        request.url().clone(),
                    ))
                } else {
                    Ok(Response::new(
                        StatusCode::OK,
                        http::HeaderMap::new(),
                        bytes::Bytes::new(),
                        request.url().clone(),
                    ))
                }
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(FlakyTerminal { calls: calls.clone() });
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));
        let stage = Arc::new(RetryMiddleware::new(policy));
        let chain = MiddlewareChain::new(vec![stage], terminal);

        let request = Request::parse(Method::GET, "http://example.test/flaky").unwrap();

        let handle = tokio::spawn(async move { chain.execute(request).await });

        // Let the spawned task run its first attempt and register its
        // backoff timer before the clock moves, then advance past each
        // failed attempt's 30s sleep without a real wait.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn a_retry_hint_on_the_error_forces_at_least_its_delay() {
        use crate::chain::{MiddlewareChain, TerminalSender};
        use crate::error::RetryHint;
        use http::Method;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct OnceFailingTerminal {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl TerminalSender for OnceFailingTerminal {
            async fn send(&self, _ctx: &crate::context::Context, request: Request) -> Result<Response> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ClientError::new(ErrorKind::Server, "backend overloaded")
                        .with_retry_hint(RetryHint { after: Duration::from_secs(60) }))
                } else {
                    Ok(Response::new(http::StatusCode::OK, http::HeaderMap::new(), bytes::Bytes::new(), request.url().clone()))
                }
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(OnceFailingTerminal { calls: calls.clone() });
        // The policy's own backoff would pick 1ms; the hint forces 60s.
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let stage = Arc::new(RetryMiddleware::new(policy));
        let chain = MiddlewareChain::new(vec![stage], terminal);

        let request = Request::parse(Method::GET, "http://example.test/flaky").unwrap();
        let handle = tokio::spawn(async move { chain.execute(request).await });

        tokio::task::yield_now().await;
        // A real, policy-sized delay (1ms) would already have fired here.
        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(!handle.is_finished());

        tokio::time::advance(Duration::from_secs(61)).await;
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
