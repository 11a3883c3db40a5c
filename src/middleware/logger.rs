use crate::context::Context;
use crate::handler::{Handler, HandlerResult};
use std::time::Instant;
use tracing::{info, warn};

/// Logs method, path, status and latency once the rest of the chain returns.
///
/// ```rust,ignore
/// server.middleware(Logger);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Handler for Logger {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> HandlerResult<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let result = ctx.next().await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let method = ctx.method();
            let mode = ctx.mode();
            match &result {
                Ok(()) => info!(
                    %method,
                    path = %ctx.path(),
                    status = ctx.response.status,
                    ?mode,
                    latency_ms,
                    "Request completed"
                ),
                Err(err) => warn!(
                    %method,
                    path = %ctx.path(),
                    status = err.status_code(),
                    ?mode,
                    latency_ms,
                    error = %err,
                    "Request failed"
                ),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain;
    use crate::handler::handler_fn;
    use crate::http::{Method, Request};
    use crate::router::ExecutionMode;
    use std::collections::HashMap;

    #[tokio::test]
    async fn passes_results_through() {
        let mut ctx = Context::new(
            Request::new(Method::GET, "/ping"),
            HashMap::new(),
            chain![
                Logger,
                handler_fn(|ctx| Box::pin(async move {
                    ctx.response.status(204);
                    Ok(())
                }))
            ]
            .into(),
            ExecutionMode::Inline,
        );
        ctx.next().await.unwrap();
        assert_eq!(ctx.response.status, 204);
    }
}
