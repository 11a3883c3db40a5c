mod pattern;
mod table;

pub use pattern::Segment;
pub use table::{RouteMatch, RouteTable};

use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::handler::{boxed, handler_fn, BoxedHandler, Chain, Handler, HandlerResult};
use crate::http::Method;
use pattern::{normalize_pattern, parse_pattern};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where a matched route's chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// On the cooperative scheduler, in the connection's own task.
    #[default]
    Inline,
    /// On a worker thread of the pool, reached through the coordinator.
    Pooled,
}

#[derive(Clone)]
pub struct Route {
    pub(crate) method: Option<Method>,
    pub(crate) pattern: String,
    pub(crate) segments: Vec<Segment>,
    pub(crate) chain: Chain,
    pub(crate) mode: ExecutionMode,
}

impl Route {
    /// `None` for routes registered with `any`.
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

/// Route registry used while the application is being assembled.
///
/// Global middleware applies to routes registered after it, the same way group
/// middleware applies to routes registered through the group.
#[derive(Default)]
pub struct Router {
    pub(crate) middlewares: Vec<BoxedHandler>,
    pub(crate) routes: Vec<Route>,
    deferred_error: Option<ServerError>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn middleware(&mut self, middleware: impl Handler) -> &mut Self {
        self.middlewares.push(boxed(middleware));
        self
    }

    pub fn middleware_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.middlewares.push(handler_fn(f));
        self
    }

    /// Validates `pattern` and stores a route whose chain is the current global
    /// middleware followed by `chain`.
    pub fn register(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        chain: Vec<BoxedHandler>,
        mode: ExecutionMode,
    ) -> ServerResult<usize> {
        let pattern = normalize_pattern(pattern);
        let segments = parse_pattern(&pattern)?;
        if chain.is_empty() {
            return Err(ServerError::InvalidPattern {
                pattern,
                reason: "route has no handler".into(),
            });
        }

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.segments == segments)
        {
            warn!(pattern = %pattern, method = ?method, "Route registered twice; the first registration wins");
        }

        let full: Vec<BoxedHandler> = self.middlewares.iter().cloned().chain(chain).collect();
        self.routes.push(Route {
            method,
            pattern,
            segments,
            chain: full.into(),
            mode,
        });
        Ok(self.routes.len() - 1)
    }

    /// Starts a group of routes sharing `prefix` and group middleware.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup {
            router: self,
            prefix: normalize_pattern(prefix),
            middlewares: Vec::new(),
        }
    }

    /// Copies every route of `router` under `path`, keeping its chains and modes.
    pub fn mount(&mut self, path: &str, router: Router) {
        if let Some(err) = router.deferred_error {
            self.defer(err);
        }
        for route in router.routes {
            let pattern = join_pattern(path, &route.pattern);
            let chain: Vec<BoxedHandler> = route.chain.iter().cloned().collect();
            if let Err(err) = self.register(route.method, &pattern, chain, route.mode) {
                self.defer(err);
            }
        }
    }

    /// Ends registration. The first registration error, if any, is returned here.
    pub fn freeze(self) -> ServerResult<RouteTable> {
        if let Some(err) = self.deferred_error {
            return Err(err);
        }
        Ok(RouteTable::new(self.routes))
    }

    fn defer(&mut self, err: ServerError) {
        warn!(error = %err, "Route registration failed");
        if self.deferred_error.is_none() {
            self.deferred_error = Some(err);
        }
    }
}

/// Registration entry points shared by [`Router`], [`RouterGroup`] and the server.
///
/// Closure handlers take the form `|ctx| Box::pin(async move { ... })`.
pub trait Routes {
    fn handle(&mut self, method: Option<Method>, pattern: &str, chain: Vec<BoxedHandler>) -> RouteHandle<'_>;

    /// Registers an explicit chain, usually built with [`chain!`](crate::chain).
    fn route(&mut self, method: Method, pattern: &str, chain: Vec<BoxedHandler>) -> RouteHandle<'_> {
        self.handle(Some(method), pattern, chain)
    }

    fn get<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::GET), pattern, vec![handler_fn(f)])
    }

    fn post<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::POST), pattern, vec![handler_fn(f)])
    }

    fn put<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::PUT), pattern, vec![handler_fn(f)])
    }

    fn delete<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::DELETE), pattern, vec![handler_fn(f)])
    }

    fn patch<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::PATCH), pattern, vec![handler_fn(f)])
    }

    fn options<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::OPTIONS), pattern, vec![handler_fn(f)])
    }

    fn head<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(Some(Method::HEAD), pattern, vec![handler_fn(f)])
    }

    /// Registers the handler for every method.
    fn any<F>(&mut self, pattern: &str, f: F) -> RouteHandle<'_>
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.handle(None, pattern, vec![handler_fn(f)])
    }
}

impl Routes for Router {
    fn handle(&mut self, method: Option<Method>, pattern: &str, chain: Vec<BoxedHandler>) -> RouteHandle<'_> {
        let index = match self.register(method, pattern, chain, ExecutionMode::Inline) {
            Ok(index) => Some(index),
            Err(err) => {
                self.defer(err);
                None
            }
        };
        RouteHandle { router: self, index }
    }
}

/// Returned by registration; adjusts the route before the router is frozen.
pub struct RouteHandle<'r> {
    router: &'r mut Router,
    index: Option<usize>,
}

impl RouteHandle<'_> {
    /// Runs this route on the worker pool instead of the cooperative scheduler.
    pub fn pooled(self) -> Self {
        if let Some(route) = self.index.and_then(|i| self.router.routes.get_mut(i)) {
            route.mode = ExecutionMode::Pooled;
        }
        self
    }

    /// Adds route-scoped middleware, placed just before the route handler.
    pub fn with(self, middleware: impl Handler) -> Self {
        if let Some(route) = self.index.and_then(|i| self.router.routes.get_mut(i)) {
            let mut chain: Vec<BoxedHandler> = route.chain.iter().cloned().collect();
            let at = chain.len().saturating_sub(1);
            chain.insert(at, boxed(middleware));
            route.chain = chain.into();
        }
        self
    }

    /// Position of the route in the table, or `None` if registration failed.
    pub fn id(&self) -> Option<usize> {
        self.index
    }
}

/// Routes registered under a shared prefix with shared middleware.
pub struct RouterGroup<'r> {
    router: &'r mut Router,
    prefix: String,
    middlewares: Vec<BoxedHandler>,
}

impl RouterGroup<'_> {
    pub fn middleware(&mut self, middleware: impl Handler) -> &mut Self {
        self.middlewares.push(boxed(middleware));
        self
    }

    pub fn middleware_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.middlewares.push(handler_fn(f));
        self
    }

    /// Nested group: prefixes and middleware are concatenated.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup {
            prefix: join_pattern(&self.prefix, prefix),
            middlewares: self.middlewares.clone(),
            router: &mut *self.router,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Routes for RouterGroup<'_> {
    fn handle(&mut self, method: Option<Method>, pattern: &str, chain: Vec<BoxedHandler>) -> RouteHandle<'_> {
        let pattern = join_pattern(&self.prefix, pattern);
        let chain = self.middlewares.iter().cloned().chain(chain).collect();
        self.router.handle(method, &pattern, chain)
    }
}

fn join_pattern(prefix: &str, pattern: &str) -> String {
    normalize_pattern(&format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        pattern.trim_start_matches('/')
    ))
}
