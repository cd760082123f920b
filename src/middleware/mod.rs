//! Middleware pipeline: composable before/after logic around the endpoint.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer, or to the endpoint once the layers run out.
//! - [`Pipeline`]: an ordered stack of layers in front of one endpoint.
//! - [`AccessLog`] and [`Cors`]: the layers the proxy binary installs.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response};

mod access_log;
mod cors;

pub use access_log::AccessLog;
pub use cors::Cors;

/// Boxed, `Send` response future returned by every layer.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Type-erased endpoint that terminates the chain.
pub type Endpoint = Arc<dyn Fn(Request) -> BoxFuture + Send + Sync + 'static>;

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<dyn Fn(Request, Next) -> BoxFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |req: Request, next: Next| middleware.handle(req, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward a request
/// at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Invokes the next layer, or the endpoint when no layers remain.
    pub async fn run(mut self, req: Request) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(req, self).await
            }
            None => (self.endpoint)(req).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(req).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next layer.
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// An ordered middleware stack in front of a single endpoint.
///
/// The first layer added is the outermost one.
///
/// # Examples
///
/// ```rust,no_run
/// use modelcache::middleware::{AccessLog, Cors, Pipeline};
/// use modelcache::{Response, StatusCode};
///
/// let pipeline = Pipeline::new(|_req| async { Response::new(StatusCode::OK) })
///     .layer(AccessLog)
///     .layer(Cors::default());
/// ```
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Endpoint,
}

impl Pipeline {
    /// Creates a pipeline with no layers around `endpoint`.
    pub fn new<H, F>(endpoint: H) -> Self
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let endpoint: Endpoint =
            Arc::new(move |req: Request| -> BoxFuture { Box::pin(endpoint(req)) });
        Self {
            middlewares: Vec::new(),
            endpoint,
        }
    }

    /// Wraps the current stack with one more (inner) layer.
    #[must_use]
    pub fn layer<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Freezes the stack into a cheaply cloneable request handler.
    pub fn into_handler(self) -> impl Fn(Request) -> BoxFuture + Send + Sync + Clone + 'static {
        let middlewares: Arc<[MiddlewareHandler]> = self.middlewares.into();
        let endpoint = self.endpoint;
        move |req: Request| -> BoxFuture {
            let next = Next {
                middlewares: Arc::clone(&middlewares),
                index: 0,
                endpoint: Arc::clone(&endpoint),
            };
            Box::pin(next.run(req))
        }
    }
}
