//! Per-connection request loop, keep-alive policy and admission control.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::http::parse::{self, Limits};
use crate::http::response::ADMISSION_REJECTED;
use crate::http::{Method, Response};
use std::io::Write as _;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Reading,
    Routing,
    Executing,
    Writing,
    KeepAlive,
    Closed,
}

/// Counts open connections against `max_connections`.
#[derive(Clone)]
pub(crate) struct Admission {
    active: Arc<AtomicUsize>,
    limit: usize,
}

impl Admission {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Takes a slot, or `None` when the ceiling is reached. The slot is given
    /// back when the guard drops.
    pub(crate) fn try_admit(&self) -> Option<AdmissionGuard> {
        let previous = self.active.fetch_add(1, Ordering::AcqRel);
        if previous >= self.limit {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(AdmissionGuard {
            active: Arc::clone(&self.active),
        })
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

pub(crate) struct AdmissionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

const REJECT_DRAIN_BYTES: u64 = 64 * 1024;
const REJECT_DRAIN_TIME: Duration = Duration::from_secs(1);

/// Answers a connection refused by admission control and lets it go.
///
/// The fixed 503 is written synchronously; a freshly accepted socket has an
/// empty send buffer. Input the client already sent is discarded before the
/// socket drops, otherwise the close would reset the connection and the
/// client could lose the 503.
pub(crate) fn reject_over_limit(stream: TcpStream, peer: SocketAddr) {
    let mut stream = match stream.into_std() {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%peer, error = %err, "Could not take over rejected socket");
            return;
        }
    };
    if let Err(err) = stream.write_all(ADMISSION_REJECTED) {
        debug!(%peer, error = %err, "Admission rejection not delivered");
        return;
    }
    if let Err(err) = stream.shutdown(Shutdown::Write) {
        debug!(%peer, error = %err, "Shutdown of rejected socket failed");
        return;
    }
    match TcpStream::from_std(stream) {
        Ok(stream) => {
            tokio::spawn(discard_input(stream, peer));
        }
        Err(err) => debug!(%peer, error = %err, "Could not drain rejected socket"),
    }
}

async fn discard_input(stream: TcpStream, peer: SocketAddr) {
    let mut input = stream.take(REJECT_DRAIN_BYTES);
    match timeout(REJECT_DRAIN_TIME, tokio::io::copy(&mut input, &mut tokio::io::sink())).await {
        Ok(Ok(discarded)) => trace!(%peer, discarded, "Rejected socket drained"),
        Ok(Err(err)) => trace!(%peer, error = %err, "Rejected socket drain failed"),
        Err(_) => trace!(%peer, "Rejected socket drain timed out"),
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone
/// without having signalled.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct Connection {
    id: u64,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    dispatcher: Dispatcher,
    config: Arc<ServerConfig>,
    limits: Limits,
    shutdown: watch::Receiver<bool>,
    served: usize,
}

/// Serves requests on `stream` until the keep-alive policy, the peer or a
/// shutdown ends the connection.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
    _admission: AdmissionGuard,
) {
    let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    debug!(conn_id = id, %peer, "Connection opened");

    let (read_half, writer) = stream.into_split();
    let mut conn = Connection {
        id,
        reader: BufReader::new(read_half),
        writer,
        dispatcher,
        limits: config.limits(),
        config,
        shutdown,
        served: 0,
    };

    if let Err(err) = conn.run().await {
        debug!(conn_id = id, error = %err, "Connection ended with an error");
    }
    conn.transition(ConnectionState::Closed);
    debug!(conn_id = id, requests = conn.served, "Connection closed");
}

impl Connection {
    async fn run(&mut self) -> ServerResult<()> {
        loop {
            self.transition(ConnectionState::Reading);
            let Some(line) = self.next_request_line().await? else {
                return Ok(());
            };

            let request = match timeout(
                self.config.request_timeout,
                parse::read_request(&mut self.reader, &line, &self.limits),
            )
            .await
            {
                Ok(Ok(request)) => request,
                Ok(Err(ServerError::IoError(err))) => return Err(ServerError::IoError(err)),
                Ok(Err(err)) => return self.reject(err).await,
                Err(_) => return self.reject(ServerError::RequestTimeout).await,
            };
            self.served += 1;

            let keep_alive = self.keep_alive_after(request.is_persistent());
            let head_only = request.method == Method::HEAD;
            let method = request.method;
            let path = request.path.clone();

            self.transition(ConnectionState::Routing);
            self.transition(ConnectionState::Executing);
            let response = self.dispatcher.dispatch(request).await;
            debug!(conn_id = self.id, %method, %path, status = response.status, "Request served");

            // A shutdown signalled while the chain ran turns this into the last response.
            let keep_alive = keep_alive && !*self.shutdown.borrow();
            self.transition(ConnectionState::Writing);
            self.write(&response, keep_alive, head_only).await?;

            if !keep_alive {
                return Ok(());
            }
            self.transition(ConnectionState::KeepAlive);
        }
    }

    /// The first request waits as long as it takes; later ones are bounded by
    /// the keep-alive timeout. A shutdown signal ends either wait.
    async fn next_request_line(&mut self) -> ServerResult<Option<String>> {
        if *self.shutdown.borrow() {
            return Ok(None);
        }
        let idle = (self.served > 0).then_some(self.config.keep_alive.timeout);
        let read = parse::read_request_line(&mut self.reader, &self.limits);

        let result = tokio::select! {
            result = async {
                match idle {
                    Some(limit) => timeout(limit, read).await.ok(),
                    None => Some(read.await),
                }
            } => result,
            _ = shutdown_signalled(&mut self.shutdown) => return Ok(None),
        };

        match result {
            None => {
                trace!(conn_id = self.id, "Keep-alive timeout");
                Ok(None)
            }
            Some(Ok(line)) => Ok(line),
            Some(Err(ServerError::IoError(err))) => Err(ServerError::IoError(err)),
            Some(Err(err)) => self.reject(err).await.map(|_| None),
        }
    }

    fn keep_alive_after(&self, client_persistent: bool) -> bool {
        let keep_alive = &self.config.keep_alive;
        keep_alive.enabled
            && client_persistent
            && (keep_alive.max_requests == 0 || self.served < keep_alive.max_requests)
            && !*self.shutdown.borrow()
    }

    /// Answers a request that could not be read and closes.
    async fn reject(&mut self, err: ServerError) -> ServerResult<()> {
        debug!(conn_id = self.id, error = %err, "Rejecting request");
        self.transition(ConnectionState::Writing);
        self.write(&Response::error(err), false, false).await
    }

    async fn write(&mut self, response: &Response, keep_alive: bool, head_only: bool) -> ServerResult<()> {
        self.writer.write_all(&response.to_bytes(keep_alive, head_only)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn transition(&self, state: ConnectionState) {
        trace!(conn_id = self.id, state = ?state, "Connection state");
    }
}
