//! Circuit breaker middleware.
//!
//! State lives under a `parking_lot::Mutex` with plain counters, plus a
//! generation counter: each admission is stamped with the generation
//! current at admit time, and a completion whose stamp doesn't match the
//! current generation is discarded. Without this, a completion racing a
//! state transition could corrupt the new generation's counts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::{ClientError, Result};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling counts for the breaker's current generation (`spec.md` §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    /// `requests` is bumped once, at admission; this only updates the
    /// success/failure tallies.
    fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    /// Fixed interval the `Closed` state's generation rotates on, or `None`
    /// to never rotate while closed.
    pub interval: Option<Duration>,
    /// How long `Open` waits before probing again.
    pub timeout: Duration,
    /// Concurrent probes `HalfOpen` admits.
    pub max_requests: u32,
    /// Decide whether the rolling counts warrant tripping to `Open`.
    pub ready_to_trip: std::sync::Arc<dyn Fn(&Counts) -> bool + Send + Sync>,
    /// Decide whether an outcome counts as a success.
    pub is_successful: std::sync::Arc<dyn Fn(Option<&ClientError>, Option<u16>) -> bool + Send + Sync>,
}

fn default_ready_to_trip(counts: &Counts) -> bool {
    counts.requests >= 5 && counts.failures * 2 >= counts.requests
}

fn default_is_successful(err: Option<&ClientError>, status: Option<u16>) -> bool {
    if err.is_some() {
        return false;
    }
    status.map(|s| s < 500).unwrap_or(true)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            interval: None,
            timeout: Duration::from_secs(30),
            max_requests: 1,
            ready_to_trip: std::sync::Arc::new(|counts| default_ready_to_trip(counts)),
            is_successful: std::sync::Arc::new(default_is_successful),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = std::sync::Arc::new(f);
        self
    }

    /// Override the default success predicate (`err.is_none() && status <
    /// 500`). `spec.md` §4.4's default treats `Network`/`Timeout`/`Server`
    /// errors as failures, which the default closure already does by
    /// failing whenever an error is present at all.
    pub fn with_is_successful<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&ClientError>, Option<u16>) -> bool + Send + Sync + 'static,
    {
        self.is_successful = std::sync::Arc::new(f);
        self
    }
}

struct State {
    circuit: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// A stamp recorded at admission time and checked at completion time to
/// discard outcomes racing a transition.
#[derive(Clone, Copy)]
struct Stamp {
    generation: u64,
}

/// Three-state FSM with generations and expiry (`spec.md` §3, §4.4).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let expiry = config.interval.map(|i| Instant::now() + i);
        Self {
            config,
            state: Mutex::new(State {
                circuit: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    /// Admit a request, per `spec.md` §4.4's admission rule. Returns the
    /// stamp to pass to `complete`, or an error if rejected.
    fn admit(&self) -> std::result::Result<Stamp, ClientError> {
        let mut transitioned = None;
        let stamp = {
            let mut state = self.state.lock();
            let now = Instant::now();

            if state.circuit == CircuitState::Open {
                if matches!(state.expiry, Some(e) if now >= e) {
                    transitioned = self.transition(&mut state, CircuitState::HalfOpen, None);
                } else {
                    return Err(ClientError::middleware(format!(
                        "circuit breaker '{}' is open",
                        self.config.name
                    )));
                }
            } else if state.circuit == CircuitState::Closed {
                if matches!(state.expiry, Some(e) if now >= e) {
                    let interval = self.config.interval;
                    transitioned = self.transition(&mut state, CircuitState::Closed, interval);
                }
            }

            if state.circuit == CircuitState::HalfOpen && state.counts.requests >= self.config.max_requests {
                return Err(ClientError::middleware(format!(
                    "circuit breaker '{}' is half-open and max requests exceeded",
                    self.config.name
                )));
            }

            state.counts.requests += 1;
            Stamp { generation: state.generation }
        };

        // `spec.md` §4.4: the state-change hook runs outside the critical
        // section — the mutex guard above is already dropped here.
        if let Some(to) = transitioned {
            Self::log_transition(&self.config.name, to);
        }
        Ok(stamp)
    }

    /// Record the outcome of a call admitted with `stamp`.
    fn complete(&self, stamp: Stamp, success: bool) {
        let mut transitioned = None;
        {
            let mut state = self.state.lock();
            if stamp.generation != state.generation {
                return;
            }

            if success {
                state.counts.record_success();
            } else {
                state.counts.record_failure();
            }

            match state.circuit {
                CircuitState::Closed => {
                    if (self.config.ready_to_trip)(&state.counts) {
                        let timeout = self.config.timeout;
                        transitioned = self.transition(&mut state, CircuitState::Open, Some(timeout));
                    }
                }
                CircuitState::HalfOpen => {
                    if success {
                        if state.counts.consecutive_successes >= self.config.max_requests {
                            let interval = self.config.interval;
                            transitioned = self.transition(&mut state, CircuitState::Closed, interval);
                        }
                    } else {
                        let timeout = self.config.timeout;
                        transitioned = self.transition(&mut state, CircuitState::Open, Some(timeout));
                    }
                }
                CircuitState::Open => {}
            }
        }

        if let Some(to) = transitioned {
            Self::log_transition(&self.config.name, to);
        }
    }

    /// Bump the generation, reset counts, set state and expiry. Called
    /// with the lock already held; returns the new state if it actually
    /// changed, for the caller to log once the lock is released.
    fn transition(&self, state: &mut State, to: CircuitState, expiry_after: Option<Duration>) -> Option<CircuitState> {
        let changed = state.circuit != to;
        state.circuit = to;
        state.generation += 1;
        state.counts = Counts::default();
        state.expiry = expiry_after.map(|d| Instant::now() + d);
        changed.then_some(to)
    }

    fn log_transition(name: &str, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(name = %name, "circuit breaker opening"),
            CircuitState::HalfOpen => debug!(name = %name, "circuit breaker half-open"),
            CircuitState::Closed => info!(name = %name, "circuit breaker closing"),
        }
    }
}

/// Wires a [`CircuitBreaker`] into the chain as a stage per `spec.md`
/// §4.1/§4.4: admit before `next`, complete after, regardless of which
/// exit path the call takes (success, error, or cancellation).
pub struct CircuitBreakerMiddleware {
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl CircuitBreakerMiddleware {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: std::sync::Arc::new(CircuitBreaker::new(config)),
        }
    }

    pub fn breaker(&self) -> std::sync::Arc<CircuitBreaker> {
        self.breaker.clone()
    }
}

#[async_trait]
impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response> {
        let stamp = self.breaker.admit()?;

        let outcome = next.next(request).await;

        let status = match &outcome {
            Ok(response) => Some(response.status().as_u16()),
            Err(err) => err.status_code(),
        };
        let success = (self.breaker.config.is_successful)(outcome.as_ref().err(), status);
        self.breaker.complete(stamp, success);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_ready_to_trip_and_rejects() {
        let config = CircuitBreakerConfig::new("test")
            .with_timeout(Duration::from_millis(50))
            .with_ready_to_trip(|counts| counts.requests >= 2 && counts.failures >= 2);
        let breaker = CircuitBreaker::new(config);

        for _ in 0..2 {
            let stamp = breaker.admit().unwrap();
            breaker.complete(stamp, false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.admit().is_err());
    }

    #[test]
    fn stale_generation_completion_is_discarded() {
        let config = CircuitBreakerConfig::new("test")
            .with_timeout(Duration::from_millis(50))
            .with_ready_to_trip(|counts| counts.failures >= 1);
        let breaker = CircuitBreaker::new(config);

        let stamp = breaker.admit().unwrap();
        // A second admission trips the breaker via its own completion.
        let stamp2 = breaker.admit().unwrap();
        breaker.complete(stamp2, false);
        assert_eq!(breaker.state(), CircuitState::Open);

        // The stale stamp from before the transition must not affect the
        // now-Open generation's counts.
        breaker.complete(stamp, true);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_enough_consecutive_successes() {
        let config = CircuitBreakerConfig::new("test")
            .with_timeout(Duration::from_millis(10))
            .with_max_requests(2)
            .with_ready_to_trip(|counts| counts.failures >= 1);
        let breaker = CircuitBreaker::new(config);

        let stamp = breaker.admit().unwrap();
        breaker.complete(stamp, false);
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        let s1 = breaker.admit().unwrap();
        breaker.complete(s1, true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let s2 = breaker.admit().unwrap();
        breaker.complete(s2, true);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
