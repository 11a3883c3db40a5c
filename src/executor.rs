//! Recovery boundary around the handler chain.

use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Runs the whole chain of `ctx`. A panicking handler becomes `ChainPanic`
/// instead of unwinding into the caller.
pub async fn execute(ctx: &mut Context) -> ServerResult<()> {
    let method = ctx.method();
    let path = ctx.path().to_string();
    match AssertUnwindSafe(ctx.next()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic);
            error!(%method, %path, panic = %message, "Handler panicked");
            Err(ServerError::ChainPanic(message))
        }
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::http::{Method, Request};
    use crate::router::ExecutionMode;
    use std::collections::HashMap;

    #[tokio::test]
    async fn panics_are_contained() {
        let mut ctx = Context::new(
            Request::new(Method::GET, "/boom"),
            HashMap::new(),
            vec![handler_fn(|ctx| {
                Box::pin(async move {
                    if ctx.path() == "/boom" {
                        panic!("kaboom");
                    }
                    Ok(())
                })
            })]
            .into(),
            ExecutionMode::Inline,
        );

        match execute(&mut ctx).await {
            Err(ServerError::ChainPanic(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("expected ChainPanic, got {:?}", other.err()),
        }
    }
}
