//! Worker pool for routes marked `.pooled()`.
//!
//! Submitters on the cooperative scheduler push encoded exchanges onto a
//! bounded work queue. A coordinator thread takes them off the queue, picks a
//! worker by [`LoadBalance`] and forwards the item to that worker's own queue.
//! Each worker runs the job to completion and sends the encoded result back on
//! the item's one-shot sink.
//!
//! The pool knows nothing about routes or contexts; it moves bytes to a job
//! and bytes back.

mod balance;
mod worker;

pub use balance::LoadBalance;

use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Work run on a pool thread: encoded exchange in, encoded exchange out.
pub type Job = Arc<dyn Fn(Vec<u8>) -> ServerResult<Vec<u8>> + Send + Sync>;

/// Items a worker holds beyond the one it is running.
const WORKER_BACKLOG: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// When false, pooled routes run inline.
    pub enabled: bool,
    /// Worker threads. 0 means one per available core.
    pub size: usize,
    pub queue_capacity: usize,
    /// How long a submitter waits for its result before answering 504.
    #[serde(rename = "timeout_ms", with = "crate::config::millis")]
    pub timeout: Duration,
    pub load_balance: LoadBalance,
    #[serde(rename = "shutdown_grace_ms", with = "crate::config::millis")]
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 0,
            queue_capacity: 1024,
            timeout: Duration::from_secs(30),
            load_balance: LoadBalance::RoundRobin,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn resolved_size(&self) -> usize {
        if self.size > 0 {
            return self.size;
        }
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: u64,
    /// Jobs that returned, with a response or an error.
    pub completed: u64,
    pub panicked: u64,
    /// Items skipped because their waiter had already timed out.
    pub abandoned: u64,
    pub timed_out: u64,
    /// Items handed to each worker and not yet finished.
    pub in_flight: Vec<usize>,
}

/// Counters shared by submitters, the coordinator and the workers.
pub(crate) struct PoolMetrics {
    pub(crate) in_flight: Vec<AtomicUsize>,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
    timed_out: AtomicU64,
}

impl PoolMetrics {
    fn new(workers: usize) -> Self {
        Self {
            in_flight: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_dispatch(&self, worker: usize) {
        self.in_flight[worker].fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_completion(&self, worker: usize) {
        self.in_flight[worker].fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self, worker: usize) {
        self.in_flight[worker].fetch_sub(1, Ordering::AcqRel);
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self, worker: usize) {
        self.in_flight[worker].fetch_sub(1, Ordering::AcqRel);
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    fn total_in_flight(&self) -> usize {
        self.in_flight.iter().map(|n| n.load(Ordering::Acquire)).sum()
    }
}

pub(crate) struct WorkItem {
    pub(crate) payload: Vec<u8>,
    pub(crate) sink: oneshot::Sender<ServerResult<Vec<u8>>>,
}

pub(crate) enum Message {
    Work(WorkItem),
    Shutdown,
}

pub struct PoolRuntime {
    config: PoolConfig,
    workers: usize,
    queue: mpsc::Sender<Message>,
    shutting_down: AtomicBool,
    metrics: Arc<PoolMetrics>,
    threads: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl PoolRuntime {
    /// Spawns the coordinator and the worker threads.
    pub fn start(config: PoolConfig, job: Job) -> ServerResult<Arc<Self>> {
        let workers = config.resolved_size();
        let metrics = Arc::new(PoolMetrics::new(workers));
        let (queue, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        let mut threads = Vec::with_capacity(workers + 1);
        let mut worker_queues = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = std_mpsc::sync_channel::<WorkItem>(WORKER_BACKLOG);
            let job = Arc::clone(&job);
            let metrics = Arc::clone(&metrics);
            let handle = thread::Builder::new()
                .name(format!("tandem-worker-{}", id))
                .spawn(move || worker::run(id, rx, job, metrics))?;
            worker_queues.push(tx);
            threads.push(handle);
        }

        let coordinator_metrics = Arc::clone(&metrics);
        let strategy = config.load_balance;
        let handle = thread::Builder::new()
            .name("tandem-coordinator".into())
            .spawn(move || worker::coordinate(queue_rx, worker_queues, strategy, coordinator_metrics))?;
        threads.push(handle);

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            load_balance = ?config.load_balance,
            "Worker pool started"
        );

        Ok(Arc::new(Self {
            config,
            workers,
            queue,
            shutting_down: AtomicBool::new(false),
            metrics,
            threads: Mutex::new(Some(threads)),
        }))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Queues `payload` and waits for its result.
    ///
    /// The whole wait, including time spent waiting for queue space, is bounded
    /// by the pool timeout. On timeout the work itself keeps running and its
    /// result is discarded.
    pub async fn submit(&self, payload: Vec<u8>) -> ServerResult<Vec<u8>> {
        if self.is_shutting_down() {
            return Err(ServerError::PoolShuttingDown);
        }
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);

        let (sink, result) = oneshot::channel();
        let wait = async {
            self.queue
                .send(Message::Work(WorkItem { payload, sink }))
                .await
                .map_err(|_| ServerError::PoolShuttingDown)?;
            result.await.map_err(|_| ServerError::PoolShuttingDown)?
        };

        match tokio::time::timeout(self.config.timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(timeout_ms = self.config.timeout.as_millis() as u64, "Pooled task timed out");
                Err(ServerError::PoolTimeout)
            }
        }
    }

    /// Stops accepting work and waits up to the grace period for the threads.
    ///
    /// Items still queued behind the stop message are answered with
    /// `PoolShuttingDown`. Threads that have not finished by the deadline are
    /// detached.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Worker pool shutting down");

        let deadline = Instant::now() + self.config.shutdown_grace;
        if tokio::time::timeout(self.config.shutdown_grace, self.queue.send(Message::Shutdown))
            .await
            .is_err()
        {
            warn!("Work queue stayed full; coordinator not notified");
        }

        let threads = match self.threads.lock() {
            Ok(mut guard) => guard.take().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().take().unwrap_or_default(),
        };

        while Instant::now() < deadline
            && (self.metrics.total_in_flight() > 0 || !threads.iter().all(JoinHandle::is_finished))
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in threads {
            let name = handle.thread().name().unwrap_or("pool thread").to_string();
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(thread = %name, "Pool thread ended with a panic");
                }
            } else {
                warn!(thread = %name, "Pool thread still busy after grace period; detaching");
            }
        }
        debug!(in_flight = self.metrics.total_in_flight(), "Worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            submitted: self.metrics.submitted.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            panicked: self.metrics.panicked.load(Ordering::Relaxed),
            abandoned: self.metrics.abandoned.load(Ordering::Relaxed),
            timed_out: self.metrics.timed_out.load(Ordering::Relaxed),
            in_flight: self
                .metrics
                .in_flight
                .iter()
                .map(|n| n.load(Ordering::Acquire))
                .collect(),
        }
    }
}
