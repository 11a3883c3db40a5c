use super::balance::{Balancer, LoadBalance};
use super::{Job, Message, PoolMetrics, WorkItem};
use crate::error::ServerError;
use crate::executor::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Coordinator loop. Routes each item to a worker; runs no application code.
///
/// Worker queues are bounded, so a full worker blocks this loop and the work
/// queue behind it fills up.
pub(crate) fn coordinate(
    mut queue: mpsc::Receiver<Message>,
    workers: Vec<std_mpsc::SyncSender<WorkItem>>,
    strategy: LoadBalance,
    metrics: Arc<PoolMetrics>,
) {
    let mut balancer = Balancer::new(strategy);

    while let Some(message) = queue.blocking_recv() {
        let item = match message {
            Message::Work(item) => item,
            Message::Shutdown => break,
        };
        let worker = balancer.pick(&metrics.in_flight);
        metrics.record_dispatch(worker);
        trace!(worker_id = worker, "Item forwarded");
        if let Err(std_mpsc::SendError(item)) = workers[worker].send(item) {
            metrics.in_flight[worker].fetch_sub(1, Ordering::AcqRel);
            error!(worker_id = worker, "Worker queue closed");
            let _ = item.sink.send(Err(ServerError::PoolShuttingDown));
        }
    }

    queue.close();
    let mut dropped = 0usize;
    while let Ok(message) = queue.try_recv() {
        if let Message::Work(item) = message {
            let _ = item.sink.send(Err(ServerError::PoolShuttingDown));
            dropped += 1;
        }
    }
    debug!(dropped, "Coordinator stopped");
    // Dropping the worker senders lets each worker finish its queue and exit.
}

/// Worker loop. Runs every item whose waiter is still there to completion.
pub(crate) fn run(id: usize, queue: std_mpsc::Receiver<WorkItem>, job: Job, metrics: Arc<PoolMetrics>) {
    debug!(worker_id = id, "Worker started");
    for WorkItem { payload, sink } in queue.iter() {
        if sink.is_closed() {
            metrics.record_abandoned(id);
            debug!(worker_id = id, "Waiter gone before start; item skipped");
            continue;
        }
        let result = match panic::catch_unwind(AssertUnwindSafe(|| job(payload))) {
            Ok(result) => {
                metrics.record_completion(id);
                result
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!(worker_id = id, panic = %message, "Pooled job panicked");
                metrics.record_panic(id);
                Err(ServerError::ChainPanic(message))
            }
        };
        if sink.send(result).is_err() {
            debug!(worker_id = id, "Waiter gone; result discarded");
        }
    }
    debug!(worker_id = id, "Worker stopped");
}
