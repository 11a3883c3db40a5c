//! `Server` is the entry point: it collects configuration and routes, then
//! binds a listener and serves.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tandem::{Routes, Server};
//!
//! let mut server = Server::new();
//! server.get("/", |ctx| Box::pin(async move {
//!     ctx.response.text("Hello!");
//!     Ok(())
//! }));
//! server.listen("127.0.0.1:3000").unwrap();
//! ```

use crate::config::ServerConfig;
use crate::connection::{self, Admission};
use crate::context::Context;
use crate::dispatch::{self, Dispatcher, ErrorHandler};
use crate::error::{ServerError, ServerResult};
use crate::handler::{BoxedHandler, Handler, HandlerResult};
use crate::http::{Method, Response};
use crate::pool::{Job, LoadBalance, PoolConfig, PoolRuntime, PoolStats};
use crate::router::{RouteHandle, Router, RouterGroup, Routes};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// An application under construction. Routes and middleware are registered
/// here; [`bind`](Server::bind) freezes them and starts serving.
pub struct Server {
    config: ServerConfig,
    router: Router,
    on_error: Option<ErrorHandler>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            on_error: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.config.max_connections = max_connections;
        self
    }

    /// Idle time allowed between requests on a kept-alive connection.
    pub fn keep_alive(&mut self, timeout: Duration) -> &mut Self {
        self.config.keep_alive.timeout = timeout;
        self
    }

    pub fn keep_alive_enabled(&mut self, enabled: bool) -> &mut Self {
        self.config.keep_alive.enabled = enabled;
        self
    }

    pub fn max_keep_alive_requests(&mut self, max_requests: usize) -> &mut Self {
        self.config.keep_alive.max_requests = max_requests;
        self
    }

    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Threads of the cooperative scheduler used by [`listen`](Server::listen).
    pub fn scheduler_threads(&mut self, threads: usize) -> &mut Self {
        self.config.scheduler_threads = threads;
        self
    }

    pub fn pool(&mut self, pool: PoolConfig) -> &mut Self {
        self.config.pool = pool;
        self
    }

    pub fn pool_size(&mut self, size: usize) -> &mut Self {
        self.config.pool.size = size;
        self
    }

    pub fn pool_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.pool.timeout = timeout;
        self
    }

    pub fn load_balance(&mut self, strategy: LoadBalance) -> &mut Self {
        self.config.pool.load_balance = strategy;
        self
    }

    /// Global middleware, applied to routes registered after this call.
    pub fn middleware(&mut self, middleware: impl Handler) -> &mut Self {
        self.router.middleware(middleware);
        self
    }

    pub fn middleware_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerResult<'a> + Send + Sync + 'static,
    {
        self.router.middleware_fn(f);
        self
    }

    /// Replaces the default JSON error body for every failed request.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ServerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        self.router.group(prefix)
    }

    pub fn mount(&mut self, path: &str, router: Router) -> &mut Self {
        self.router.mount(path, router);
        self
    }

    /// Freezes the routes, starts the pool if any route needs it, binds `addr`
    /// and spawns the accept loop on the current runtime.
    pub async fn bind<A: ToSocketAddrs>(self, addr: A) -> ServerResult<ServerHandle> {
        self.config
            .validate()
            .map_err(|err| ServerError::InternalError(err.to_string()))?;

        let table = Arc::new(self.router.freeze()?);
        let pool = if !table.has_pooled_routes() {
            None
        } else if self.config.pool.enabled {
            let routes = Arc::clone(&table);
            let job: Job = Arc::new(move |payload: Vec<u8>| {
                futures::executor::block_on(dispatch::execute_exchange(&routes, payload))
            });
            Some(PoolRuntime::start(self.config.pool.clone(), job)?)
        } else {
            warn!("Pooled routes are registered but the pool is disabled; they will run inline");
            None
        };

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = Arc::new(self.config);
        let admission = Admission::new(config.max_connections);
        let dispatcher = Dispatcher::new(table, pool.clone(), self.on_error);

        info!(
            %local_addr,
            routes = dispatcher.table().len(),
            max_connections = config.max_connections,
            pooled = pool.is_some(),
            "Server listening"
        );

        let accept = tokio::spawn(accept_loop(
            listener,
            dispatcher,
            Arc::clone(&config),
            admission.clone(),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            accept,
            admission,
            pool,
            grace: config.pool.shutdown_grace,
        })
    }

    /// Builds the scheduler, serves on `addr` and shuts down on Ctrl-C.
    pub fn listen(self, addr: &str) -> ServerResult<()> {
        let runtime = build_runtime(self.config.scheduler_threads)?;
        runtime.block_on(async move {
            let handle = self.bind(addr).await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            handle.shutdown().await;
            Ok::<(), ServerError>(())
        })
    }
}

impl Routes for Server {
    fn handle(&mut self, method: Option<Method>, pattern: &str, chain: Vec<BoxedHandler>) -> RouteHandle<'_> {
        self.router.handle(method, pattern, chain)
    }
}

fn build_runtime(threads: usize) -> ServerResult<Runtime> {
    let runtime = if threads <= 1 {
        Builder::new_current_thread().enable_all().build()?
    } else {
        Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("tandem-scheduler")
            .enable_all()
            .build()?
    };
    Ok(runtime)
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    config: Arc<ServerConfig>,
    admission: Admission,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = connection::shutdown_signalled(&mut shutdown) => break,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let Some(guard) = admission.try_admit() else {
            warn!(%peer, limit = config.max_connections, "Connection limit reached; rejecting");
            connection::reject_over_limit(stream, peer);
            continue;
        };
        let _ = stream.set_nodelay(true);

        tokio::spawn(connection::serve_connection(
            stream,
            peer,
            dispatcher.clone(),
            Arc::clone(&config),
            shutdown.clone(),
            guard,
        ));
    }
    info!("Accept loop stopped");
}

/// A running server. Dropping the handle leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept: JoinHandle<()>,
    admission: Admission,
    pool: Option<Arc<PoolRuntime>>,
    grace: Duration,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.admission.active()
    }

    pub fn pool(&self) -> Option<&Arc<PoolRuntime>> {
        self.pool.as_ref()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|pool| pool.stats())
    }

    /// Stops accepting, lets open connections finish their current request,
    /// then drains the pool.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.accept.await {
            warn!(error = %err, "Accept loop ended abnormally");
        }

        let deadline = Instant::now() + self.grace;
        while self.admission.active() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.admission.active() > 0 {
            warn!(open = self.admission.active(), "Connections still open after grace period");
        }

        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        info!("Server stopped");
    }
}
