use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::run::RunExecutor;
use crate::error::QueueError;
use crate::queue::RunQueue;
use crate::shutdown::Shutdown;

/// A fixed set of worker tasks pulling runs from the queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. Queue invariant violations are sent on
    /// `fatal`; the reporting worker stops afterwards.
    pub fn start(
        worker_count: usize,
        queue: Arc<RunQueue>,
        runner: Arc<RunExecutor>,
        shutdown: Shutdown,
        fatal: mpsc::UnboundedSender<QueueError>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&runner),
                    shutdown.clone(),
                    fatal.clone(),
                ))
            })
            .collect();

        info!(workers = worker_count, "Started worker pool");
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit. Busy workers finish their current run.
    pub async fn wait(self) {
        for (worker_id, result) in join_all(self.workers).await.into_iter().enumerate() {
            match result {
                Ok(()) => debug!(worker = worker_id, "Worker finished"),
                Err(e) => error!(worker = worker_id, error = %e, "Worker panicked"),
            }
        }
        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<RunQueue>,
    runner: Arc<RunExecutor>,
    shutdown: Shutdown,
    fatal: mpsc::UnboundedSender<QueueError>,
) {
    debug!(worker = worker_id, "Worker started");

    loop {
        let lease = match queue.dequeue(&shutdown).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(worker = worker_id, "Worker received shutdown signal");
                break;
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "Run queue invariant violated");
                let _ = fatal.send(e);
                break;
            }
        };

        runner.execute(lease.request().clone()).await;

        if let Err(e) = lease.finish() {
            error!(worker = worker_id, error = %e, "Run queue invariant violated");
            let _ = fatal.send(e);
            break;
        }
    }
}
