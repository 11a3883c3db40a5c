use crate::context::Context;
use crate::error::ServerResult;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Result of one chain participant.
pub type HandlerResult<'a> = BoxFuture<'a, ServerResult<()>>;

/// A chain participant: middleware and route handlers share this interface.
///
/// A handler receives the request [`Context`], may call [`Context::next`] to run
/// the rest of the chain, and may call [`Context::abort`] to stop it.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> HandlerResult<'a>;
}

pub type BoxedHandler = Arc<dyn Handler>;

/// The frozen handler list of a route: global, group and route middleware,
/// then the route handler.
pub type Chain = Arc<[BoxedHandler]>;

/// Adapts a closure to [`Handler`].
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> HandlerResult<'a> {
        (self.0)(ctx)
    }
}

/// Boxes a closure of the form `|ctx| Box::pin(async move { ... })`.
pub fn handler_fn<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Builds a handler chain from a list of handler values.
///
/// ```rust,ignore
/// server.route(Method::GET, "/admin", chain![Auth, Audit, handler_fn(|ctx| Box::pin(async move {
///     ctx.response.text("ok");
///     Ok(())
/// }))]);
/// ```
#[macro_export]
macro_rules! chain {
    ($($handler:expr),+ $(,)?) => {
        vec![$($crate::handler::boxed($handler)),+]
    };

    () => {
        compile_error!("The chain! macro requires at least one handler")
    };
}

/// Boxes any handler value.
pub fn boxed<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

impl Handler for BoxedHandler {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> HandlerResult<'a> {
        (**self).call(ctx)
    }
}
