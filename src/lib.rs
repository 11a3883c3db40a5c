//! # Tandem
//!
//! A small HTTP/1.1 server engine with two execution domains. Ordinary routes
//! run inline on a cooperative tokio scheduler; routes marked `.pooled()` run
//! on a fixed pool of OS threads, so blocking or CPU-heavy handlers never stall
//! the connections around them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::{json, Routes, Server};
//!
//! let mut server = Server::new();
//! server.middleware(tandem::middleware::Logger);
//!
//! server.get("/users/:id", |ctx| Box::pin(async move {
//!     let body = json!({ "id": ctx.param("id"), "x": ctx.query("x") });
//!     ctx.response.json(&body)?;
//!     Ok(())
//! }));
//!
//! server.post("/reports", |ctx| Box::pin(async move {
//!     // Runs on a worker thread.
//!     ctx.response.text("done");
//!     Ok(())
//! })).pooled();
//!
//! tandem::logging::init();
//! server.listen("127.0.0.1:3000").unwrap();
//! ```
//!
//! ## Handlers
//!
//! Middleware and route handlers share one signature and one
//! [`Context`]. A handler may call [`Context::next`] to run the rest of the
//! chain and then continue, or [`Context::abort`] to stop it.
//!
//! Pooled handlers run under `futures::executor::block_on` on a worker thread,
//! outside any tokio runtime. They should do their work synchronously.

pub mod app;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod handler;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod pool;
pub mod router;
pub extern crate serde_json;

pub use app::{Server, ServerHandle};
pub use config::{ConfigError, KeepAliveConfig, ServerConfig};
pub use context::Context;
pub use error::{ServerError, ServerResult};
pub use handler::{handler_fn, BoxedHandler, Handler, HandlerResult};
pub use http::{Body, Method, Request, Response};
pub use pool::{LoadBalance, PoolConfig, PoolStats};
pub use router::{ExecutionMode, RouteHandle, Router, RouterGroup, Routes};

// Reexport serde_json
pub use serde_json::{json, Value};
