//! CPU-heavy work on the worker pool while cheap routes stay on the
//! cooperative scheduler.

use std::time::Duration;
use tandem::{json, LoadBalance, Routes, Server};

fn fib(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

fn main() {
    tandem::logging::init();

    let mut server = Server::new();
    server
        .pool_size(4)
        .pool_timeout(Duration::from_secs(10))
        .load_balance(LoadBalance::LeastLoaded);

    server.get("/health", |ctx| {
        Box::pin(async move {
            ctx.response.text("ok");
            Ok(())
        })
    });

    server
        .get("/fib/:n", |ctx| {
            Box::pin(async move {
                let n: u64 = ctx
                    .param("n")
                    .and_then(|n| n.parse().ok())
                    .filter(|n| *n <= 45)
                    .ok_or_else(|| tandem::ServerError::BadRequest("n must be an integer up to 45".into()))?;
                ctx.response.json(&json!({ "n": n, "fib": fib(n) }))?;
                Ok(())
            })
        })
        .pooled();

    server.listen("127.0.0.1:3000").expect("Server failed to start");
}
