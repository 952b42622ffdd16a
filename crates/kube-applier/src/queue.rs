//! Coalescing run queue.
//!
//! At most one request is pending per target; a newer request for a target
//! that is already pending replaces it in place. A target that is running is
//! never handed out again until its [`RunLease`] is released, so no two runs
//! for the same target overlap.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::QueueError;
use crate::model::RunRequest;
use crate::shutdown::Shutdown;

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, RunRequest>,
    /// Pending namespaces in first-enqueued order.
    order: VecDeque<String>,
    running: HashSet<String>,
}

#[derive(Default)]
pub struct RunQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl RunQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a request, merging it into any pending request for the same
    /// target. Returns true if it was merged.
    pub fn enqueue(&self, request: RunRequest) -> bool {
        let namespace = request.namespace().to_string();
        let merged = {
            let mut state = self.state();
            match state.pending.remove(&namespace) {
                Some(existing) => {
                    let merged = existing.coalesce(request);
                    tracing::debug!(
                        namespace = %namespace,
                        kind = %merged.kind,
                        revision = %merged.revision,
                        "Coalesced run request"
                    );
                    state.pending.insert(namespace, merged);
                    true
                }
                None => {
                    tracing::debug!(
                        namespace = %namespace,
                        kind = %request.kind,
                        "Enqueued run request"
                    );
                    state.order.push_back(namespace.clone());
                    state.pending.insert(namespace, request);
                    false
                }
            }
        };
        self.notify.notify_waiters();
        merged
    }

    /// Takes the oldest pending request whose target is not running.
    pub fn try_dequeue(self: &Arc<Self>) -> Result<Option<RunLease>, QueueError> {
        let mut state = self.state();
        let position = state
            .order
            .iter()
            .position(|ns| !state.running.contains(ns));
        let Some(position) = position else {
            return Ok(None);
        };

        let Some(namespace) = state.order.remove(position) else {
            return Ok(None);
        };
        let Some(request) = state.pending.remove(&namespace) else {
            return Ok(None);
        };
        if !state.running.insert(namespace.clone()) {
            return Err(QueueError::AlreadyRunning(namespace));
        }

        Ok(Some(RunLease {
            queue: Arc::clone(self),
            request,
            released: false,
        }))
    }

    /// Waits for a request that can run. Returns `None` once shutdown is
    /// triggered.
    pub async fn dequeue(self: &Arc<Self>, shutdown: &Shutdown) -> Result<Option<RunLease>, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown.is_triggered() {
                return Ok(None);
            }
            if let Some(lease) = self.try_dequeue()? {
                return Ok(Some(lease));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = shutdown.wait() => return Ok(None),
            }
        }
    }

    /// Drops the pending request for a target, if any.
    pub fn discard(&self, namespace: &str) -> Option<RunRequest> {
        let mut state = self.state();
        let request = state.pending.remove(namespace)?;
        state.order.retain(|ns| ns != namespace);
        Some(request)
    }

    pub fn pending(&self, namespace: &str) -> Option<RunRequest> {
        self.state().pending.get(namespace).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_running(&self, namespace: &str) -> bool {
        self.state().running.contains(namespace)
    }

    pub fn running_len(&self) -> usize {
        self.state().running.len()
    }

    fn release(&self, namespace: &str) -> Result<(), QueueError> {
        let removed = self.state().running.remove(namespace);
        self.notify.notify_waiters();
        if removed {
            Ok(())
        } else {
            Err(QueueError::NotRunning(namespace.to_string()))
        }
    }
}

/// Exclusive right to run one target. The target becomes eligible again
/// when the lease is finished or dropped.
pub struct RunLease {
    queue: Arc<RunQueue>,
    request: RunRequest,
    released: bool,
}

impl RunLease {
    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    pub fn namespace(&self) -> &str {
        self.request.namespace()
    }

    /// Releases the target, reporting a broken running-set invariant.
    pub fn finish(mut self) -> Result<(), QueueError> {
        self.released = true;
        self.queue.release(self.request.namespace())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.queue.release(self.request.namespace()) {
            tracing::error!(error = %e, "Run lease released twice");
        }
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease")
            .field("namespace", &self.namespace())
            .field("kind", &self.request.kind)
            .finish()
    }
}
