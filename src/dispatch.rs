//! Routes a parsed request and runs its chain in the route's execution domain.

use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::exchange::{self, Exchange};
use crate::executor;
use crate::http::{Request, Response};
use crate::pool::PoolRuntime;
use crate::router::{ExecutionMode, RouteMatch, RouteTable};
use std::sync::Arc;
use tracing::{debug, error};

pub type ErrorHandler = Arc<dyn Fn(ServerError) -> Response + Send + Sync>;

#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    pool: Option<Arc<PoolRuntime>>,
    on_error: Option<ErrorHandler>,
}

impl Dispatcher {
    /// Without a pool, pooled routes run inline.
    pub fn new(table: Arc<RouteTable>, pool: Option<Arc<PoolRuntime>>, on_error: Option<ErrorHandler>) -> Self {
        Self { table, pool, on_error }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn pool(&self) -> Option<&Arc<PoolRuntime>> {
        self.pool.as_ref()
    }

    /// Produces the response for `request`. Every failure, including a panic in
    /// a handler, comes back as an error response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let RouteMatch { route, route_id, params } = match self.table.match_route(request.method, &request.path) {
            Ok(found) => found,
            Err(err) => return self.error_response(err),
        };

        let pool = match route.mode() {
            ExecutionMode::Pooled => self.pool.as_deref(),
            ExecutionMode::Inline => None,
        };
        let mode = if pool.is_some() { ExecutionMode::Pooled } else { ExecutionMode::Inline };
        let mut ctx = Context::new(request, params, route.chain().clone(), mode);

        let result = match pool {
            Some(pool) => run_pooled(pool, &mut ctx, route_id).await,
            None => executor::execute(&mut ctx).await,
        };

        match result {
            Ok(()) => ctx.into_response(),
            Err(err) => self.error_response(err),
        }
    }

    fn error_response(&self, err: ServerError) -> Response {
        if err.is_server_fault() {
            error!(error = %err, status = err.status_code(), "Request failed");
        } else {
            debug!(error = %err, status = err.status_code(), "Request rejected");
        }
        match &self.on_error {
            Some(handler) => handler(err),
            None => Response::error(err),
        }
    }
}

/// Ships the context to the pool and copies the pooled side's results back.
async fn run_pooled(pool: &PoolRuntime, ctx: &mut Context, route_id: usize) -> ServerResult<()> {
    let payload = exchange::encode(&Exchange::capture(ctx, route_id))?;
    let reply = pool.submit(payload).await?;
    exchange::decode(&reply)?.apply_to(ctx);
    Ok(())
}

/// Pool-side half of a pooled dispatch: rebuilds the context, runs the route's
/// chain and encodes the result.
pub(crate) async fn execute_exchange(table: &RouteTable, payload: Vec<u8>) -> ServerResult<Vec<u8>> {
    let exchange = exchange::decode(&payload)?;
    let route_id = exchange.route_id;
    let route = table
        .route(route_id)
        .ok_or_else(|| ServerError::Exchange(format!("unknown route id {}", route_id)))?;

    let mut ctx = exchange.into_context(route.chain().clone(), ExecutionMode::Pooled);
    executor::execute(&mut ctx).await?;
    exchange::encode(&Exchange::capture(&ctx, route_id))
}
