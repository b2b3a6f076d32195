//! The middleware chain abstraction.
//!
//! A chain is built from an ordered list of stages `[M1..Mn]` plus a
//! terminal sender `T`. Construction folds right-to-left so `M1` is
//! outermost: `M1(ctx, req, M2(ctx, ·, … Mn(ctx, ·, T)))`. The terminal
//! is an opaque `TerminalSender` trait object rather than a hardcoded
//! `reqwest::Client`, so a test can swap in a fake transport.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// The opaque terminal operation that performs the network call.
#[async_trait]
pub trait TerminalSender: Send + Sync {
    async fn send(&self, ctx: &Context, request: Request) -> Result<Response>;
}

/// A reqwest-backed terminal sender — the default, concrete transport.
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TerminalSender for ReqwestSender {
    async fn send(&self, _ctx: &Context, request: Request) -> Result<Response> {
        let built = request.to_reqwest(&self.client)?;
        let response = self.client.execute(built).await.map_err(crate::error::ClientError::from)?;
        Response::from_reqwest(response).await
    }
}

/// A single stage in the pipeline.
///
/// Stages must be invokable concurrently: distinct in-flight requests share
/// the same stage instance, so any mutable state a stage keeps must be
/// guarded (an `RwLock`/`Mutex`/atomic), never bare interior mutability.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used only in logs and error messages; uniqueness is not
    /// required.
    fn name(&self) -> &str;

    /// Process `request` and call `next` zero, one, or multiple times.
    /// Multiple invocations require cloning `request` first — cheap here
    /// since the body is always in memory (`spec.md` §4.1).
    async fn handle(&self, request: Request, next: &MiddlewareChain) -> Result<Response>;
}

/// The composed chain. Each `execute_at` step either dispatches to the next
/// stage or, once the index runs past the last stage, invokes the terminal
/// sender.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn TerminalSender>,
    index: usize,
}

impl MiddlewareChain {
    /// Build a chain from an ordered stage list and a terminal sender.
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, terminal: Arc<dyn TerminalSender>) -> Self {
        Self {
            middlewares,
            terminal,
            index: 0,
        }
    }

    /// Run the whole chain against `request`.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_at(0, request).await
    }

    async fn execute_at(&self, index: usize, request: Request) -> Result<Response> {
        if index >= self.middlewares.len() {
            let ctx = request.context().clone();
            self.terminal.send(&ctx, request).await
        } else {
            let next = MiddlewareChain {
                middlewares: self.middlewares.clone(),
                terminal: self.terminal.clone(),
                index: index + 1,
            };
            self.middlewares[index].handle(request, &next).await
        }
    }

    /// Continue to the remainder of the chain from whatever stage this
    /// chain value currently represents. Called by a stage's `handle` with
    /// the `next: &MiddlewareChain` it was given.
    pub async fn next(&self, request: Request) -> Result<Response> {
        self.execute_at(self.index, request).await
    }
}
