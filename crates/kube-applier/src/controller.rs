//! Wires the scheduler, queue, worker pool and sinks together and owns their
//! lifecycle.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Settings;
use crate::error::{ApplierError, QueueError, Result, SourceError};
use crate::exec::ApplyExecutor;
use crate::model::RunResult;
use crate::queue::RunQueue;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
use crate::shutdown::Shutdown;
use crate::sink::{FanoutSink, ResultBroadcaster, ResultSink, RunHistory};
use crate::source::{ManifestSource, TargetSource};
use crate::worker::{RunExecutor, WorkerPool};

/// A configured, not yet started controller.
pub struct Controller {
    settings: Arc<Settings>,
    manifests: Arc<dyn ManifestSource>,
    targets: Arc<dyn TargetSource>,
    executor: Arc<dyn ApplyExecutor>,
    history: Arc<RunHistory>,
    broadcaster: Arc<ResultBroadcaster>,
    sinks: Vec<Arc<dyn ResultSink>>,
    shutdown: Shutdown,
}

impl Controller {
    pub fn new(
        settings: Settings,
        manifests: Arc<dyn ManifestSource>,
        targets: Arc<dyn TargetSource>,
        executor: Arc<dyn ApplyExecutor>,
    ) -> Self {
        let history = Arc::new(RunHistory::new(settings.history_size));
        let broadcaster = Arc::new(ResultBroadcaster::new(settings.history_size));
        Self {
            settings: Arc::new(settings),
            manifests,
            targets,
            executor,
            history,
            broadcaster,
            sinks: Vec::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Adds a sink that receives every finished run.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn history(&self) -> Arc<RunHistory> {
        Arc::clone(&self.history)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunResult>> {
        self.broadcaster.subscribe()
    }

    /// The signal that stops the controller once triggered.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Spawns the scheduler and the workers. Must be called within a tokio runtime.
    pub fn start(self) -> RunningController {
        let queue = RunQueue::new();

        let mut fanout = FanoutSink::default();
        fanout.push(self.history.clone());
        fanout.push(self.broadcaster.clone());
        for sink in self.sinks {
            fanout.push(sink);
        }

        let runner = Arc::new(RunExecutor::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.manifests),
            Arc::clone(&self.targets),
            Arc::clone(&self.executor),
            Arc::new(fanout),
        ));

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(
            self.settings.effective_worker_count(),
            Arc::clone(&queue),
            runner,
            self.shutdown.clone(),
            fatal_tx,
        );

        let (scheduler, handle) = Scheduler::new(
            SchedulerConfig::from_settings(&self.settings),
            self.manifests,
            self.targets,
            Arc::clone(&queue),
        );
        let scheduler = tokio::spawn(scheduler.run(self.shutdown.clone()));

        info!(
            workers = pool.size(),
            dry_run = self.settings.dry_run,
            "Controller started"
        );

        RunningController {
            queue,
            history: self.history,
            handle,
            shutdown: self.shutdown,
            scheduler,
            pool,
            fatal_rx,
        }
    }

    /// Starts the controller and waits until it stops.
    pub async fn run(self) -> Result<()> {
        self.start().wait().await
    }
}

/// Handle to a started controller.
pub struct RunningController {
    queue: Arc<RunQueue>,
    history: Arc<RunHistory>,
    handle: SchedulerHandle,
    shutdown: Shutdown,
    scheduler: JoinHandle<std::result::Result<(), SourceError>>,
    pool: WorkerPool,
    fatal_rx: mpsc::UnboundedReceiver<QueueError>,
}

impl RunningController {
    pub fn queue(&self) -> &Arc<RunQueue> {
        &self.queue
    }

    pub fn history(&self) -> &Arc<RunHistory> {
        &self.history
    }

    /// Requests an immediate run of a target.
    pub fn force(&self, namespace: impl Into<String>) -> bool {
        self.handle.force(namespace)
    }

    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Waits until shutdown is triggered or a fatal error occurs, then drains
    /// the workers. In-flight runs complete before this returns.
    pub async fn wait(mut self) -> Result<()> {
        let mut scheduler_done = false;
        let outcome = tokio::select! {
            joined = &mut self.scheduler => {
                scheduler_done = true;
                match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!(error = %e, "Scheduler failed");
                        Err(ApplierError::Source(e))
                    }
                    Err(e) => Err(ApplierError::Worker(format!("Scheduler task failed: {}", e))),
                }
            }
            Some(e) = self.fatal_rx.recv() => {
                error!(error = %e, "Fatal run queue error, shutting down");
                Err(ApplierError::Invariant(e))
            }
        };

        self.shutdown.trigger();
        if !scheduler_done {
            if let Err(e) = (&mut self.scheduler).await {
                error!(error = %e, "Scheduler task failed");
            }
        }
        self.pool.wait().await;

        // A violation reported while draining still fails the controller.
        if outcome.is_ok() {
            if let Ok(e) = self.fatal_rx.try_recv() {
                return Err(ApplierError::Invariant(e));
            }
        }

        info!("Controller stopped");
        outcome
    }

    /// Triggers shutdown and waits for the drain to complete.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.wait().await
    }
}
