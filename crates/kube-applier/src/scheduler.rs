//! Produces run requests: revision changes, per-target periodic timers and
//! forced triggers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::SourceError;
use crate::model::{RunKind, RunRequest, Target};
use crate::queue::RunQueue;
use crate::shutdown::Shutdown;
use crate::source::{ManifestSource, TargetSource};

/// Timing knobs for the scheduler loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub git_poll_interval: Duration,
    pub tick: Duration,
    pub default_poll_interval: Duration,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            git_poll_interval: settings.git_poll_interval(),
            tick: settings.scheduler_tick(),
            default_poll_interval: settings.default_poll_interval(),
        }
    }
}

/// Requests forced runs from outside the scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl SchedulerHandle {
    /// Asks for an immediate run of a target, even if auto-apply is off.
    /// Returns false if the scheduler has stopped.
    pub fn force(&self, namespace: impl Into<String>) -> bool {
        self.tx.send(namespace.into()).is_ok()
    }
}

enum Event {
    Force(String),
    PollRevision,
    Tick,
}

pub struct Scheduler {
    config: SchedulerConfig,
    manifests: Arc<dyn ManifestSource>,
    targets: Arc<dyn TargetSource>,
    queue: Arc<RunQueue>,
    force_rx: mpsc::UnboundedReceiver<String>,
    revision: String,
    /// Next periodic deadline per auto-apply target.
    next_due: HashMap<String, Instant>,
    known: HashSet<String>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        manifests: Arc<dyn ManifestSource>,
        targets: Arc<dyn TargetSource>,
        queue: Arc<RunQueue>,
    ) -> (Self, SchedulerHandle) {
        let (tx, force_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            config,
            manifests,
            targets,
            queue,
            force_rx,
            revision: String::new(),
            next_due: HashMap::new(),
            known: HashSet::new(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Runs until shutdown. Fails only if the initial revision cannot be read.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), SourceError> {
        self.revision = self.manifests.current_revision().await?;
        info!(revision = %self.revision, "Scheduler started");

        let mut git_poll = tokio::time::interval(self.config.git_poll_interval);
        git_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        git_poll.tick().await; // skip immediate first tick

        // The first tick fires immediately, so startup performs a full pass.
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                Some(namespace) = self.force_rx.recv() => Event::Force(namespace),
                _ = git_poll.tick() => Event::PollRevision,
                _ = tick.tick() => Event::Tick,
            };

            match event {
                Event::Force(namespace) => self.force(&namespace).await,
                Event::PollRevision => self.poll_revision().await,
                Event::Tick => self.evaluate_timers().await,
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    async fn list_targets(&mut self) -> Option<Vec<Target>> {
        match self.targets.list().await {
            Ok(targets) => {
                self.forget_missing(&targets);
                Some(targets)
            }
            Err(e) => {
                warn!(error = %e, "Failed to list targets");
                None
            }
        }
    }

    /// Drops timer state and pending requests of targets that disappeared.
    fn forget_missing(&mut self, targets: &[Target]) {
        let current: HashSet<String> = targets.iter().map(|t| t.namespace.clone()).collect();
        for gone in self.known.difference(&current) {
            info!(namespace = %gone, "Target removed");
            self.next_due.remove(gone);
            self.queue.discard(gone);
        }
        self.known = current;
    }

    async fn poll_revision(&mut self) {
        let revision = match self.manifests.current_revision().await {
            Ok(revision) => revision,
            Err(e) => {
                warn!(error = %e, "Failed to read manifest revision");
                return;
            }
        };
        if revision == self.revision {
            return;
        }

        // Only record the new revision once the targets have been requested,
        // so a listing failure retries the commit trigger on the next poll.
        let Some(targets) = self.list_targets().await else {
            return;
        };
        info!(old = %self.revision, new = %revision, "Manifest revision changed");
        self.revision = revision;

        for target in targets.into_iter().filter(|t| t.auto_apply) {
            self.queue.enqueue(RunRequest::new(
                target,
                RunKind::CommitTriggered,
                self.revision.clone(),
            ));
        }
    }

    async fn evaluate_timers(&mut self) {
        let Some(targets) = self.list_targets().await else {
            return;
        };

        let now = Instant::now();
        for target in targets {
            if !target.auto_apply {
                self.next_due.remove(&target.namespace);
                continue;
            }

            let due = self
                .next_due
                .get(&target.namespace)
                .map_or(true, |deadline| *deadline <= now);
            if !due {
                continue;
            }

            let interval = target.effective_poll_interval(self.config.default_poll_interval);
            self.next_due.insert(target.namespace.clone(), now + interval);
            debug!(namespace = %target.namespace, "Periodic run due");
            self.queue
                .enqueue(RunRequest::new(target, RunKind::Periodic, self.revision.clone()));
        }
    }

    async fn force(&mut self, namespace: &str) {
        let Some(targets) = self.list_targets().await else {
            return;
        };

        match targets.into_iter().find(|t| t.namespace == namespace) {
            Some(target) => {
                info!(namespace = %namespace, "Forced run requested");
                self.queue
                    .enqueue(RunRequest::new(target, RunKind::Forced, self.revision.clone()));
            }
            None => warn!(namespace = %namespace, "Ignoring forced run for unknown target"),
        }
    }
}
