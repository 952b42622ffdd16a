//! In-memory collaborators for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use kube_applier::exec::prune_candidates;
use kube_applier::{
    ApplyExecutor, ApplyOutput, ApplyRequest, ExecError, ManifestSnapshot, ManifestSource,
    ObjectRef, PruneOutcome, PruneRequest, SourceError,
};

/// Manifest tree in a temp directory with a settable revision.
pub struct FakeManifests {
    dir: TempDir,
    revision: Mutex<String>,
    fail: AtomicBool,
}

impl FakeManifests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            revision: Mutex::new("rev-1".to_string()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file relative to the tree root, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create manifest dir");
        }
        std::fs::write(&path, content).expect("Failed to write manifest");
        path
    }

    pub fn set_revision(&self, revision: &str) {
        *self.revision.lock().unwrap() = revision.to_string();
    }

    /// Makes every call fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManifestSource for FakeManifests {
    async fn current_revision(&self) -> Result<String, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Git("repository unavailable".to_string()));
        }
        Ok(self.revision.lock().unwrap().clone())
    }

    async fn snapshot(&self) -> Result<ManifestSnapshot, SourceError> {
        let revision = self.current_revision().await?;
        Ok(ManifestSnapshot::new(self.dir.path(), revision))
    }
}

/// Scripted behaviour for a manifest file, keyed by file name.
#[derive(Debug, Clone)]
pub enum Script {
    Reject(String),
    /// Fails transiently this many times, then succeeds.
    Transient(u32),
    /// Never returns.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCall {
    pub namespace: String,
    pub file: String,
    pub dry_run: bool,
    pub has_credential: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneCall {
    pub namespace: String,
    pub dry_run: bool,
    pub applied: Vec<ObjectRef>,
}

/// Executor that records calls, tracks concurrency and keeps a fake cluster.
///
/// Each file `<stem>.<ext>` produces `configmap/<stem>` in the target namespace.
#[derive(Default)]
pub struct FakeExecutor {
    delay: Duration,
    scripts: Mutex<HashMap<String, Script>>,
    applies: Mutex<Vec<ApplyCall>>,
    prunes: Mutex<Vec<PruneCall>>,
    cluster: Mutex<HashMap<String, BTreeSet<ObjectRef>>>,
    mutations: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    active_namespaces: Mutex<HashSet<String>>,
    overlap: AtomicBool,
}

struct ActiveGuard<'a> {
    executor: &'a FakeExecutor,
    namespace: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.executor.active.fetch_sub(1, Ordering::SeqCst);
        self.executor
            .active_namespaces
            .lock()
            .unwrap()
            .remove(&self.namespace);
    }
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every invocation sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn script(&self, file_name: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), script);
    }

    pub fn seed(&self, namespace: &str, objects: &[ObjectRef]) {
        self.cluster
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .extend(objects.iter().cloned());
    }

    pub fn cluster(&self, namespace: &str) -> BTreeSet<ObjectRef> {
        self.cluster
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn applies(&self) -> Vec<ApplyCall> {
        self.applies.lock().unwrap().clone()
    }

    pub fn prunes(&self) -> Vec<PruneCall> {
        self.prunes.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// True if two invocations for the same namespace ever overlapped.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    fn enter(&self, namespace: &str) -> ActiveGuard<'_> {
        if !self
            .active_namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string())
        {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard {
            executor: self,
            namespace: namespace.to_string(),
        }
    }

    /// Applies the script for a file, if any. `Some` ends the call early.
    fn scripted(&self, file_name: &str) -> Option<Result<(), ExecError>> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(file_name)? {
            Script::Reject(message) => Some(Err(ExecError::Rejected(message.clone()))),
            Script::Transient(0) => None,
            Script::Transient(remaining) => {
                *remaining -= 1;
                Some(Err(ExecError::Transient("connection refused".to_string())))
            }
            Script::Hang => Some(Ok(())),
        }
    }
}

#[async_trait]
impl ApplyExecutor for FakeExecutor {
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<ApplyOutput, ExecError> {
        let _active = self.enter(request.namespace);
        let file_name = request
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.applies.lock().unwrap().push(ApplyCall {
            namespace: request.namespace.to_string(),
            file: file_name.clone(),
            dry_run: request.dry_run,
            has_credential: request.credential.is_some(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.scripted(&file_name) {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => std::future::pending::<()>().await,
            None => {}
        }

        let stem = request
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let object = ObjectRef::new("configmap", stem);
        if !request.dry_run {
            self.cluster
                .lock()
                .unwrap()
                .entry(request.namespace.to_string())
                .or_default()
                .insert(object.clone());
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }

        Ok(ApplyOutput {
            output: format!("{}\n", object),
            objects: vec![object],
        })
    }

    async fn prune(&self, request: PruneRequest<'_>) -> Result<Vec<PruneOutcome>, ExecError> {
        let _active = self.enter(request.namespace);
        self.prunes.lock().unwrap().push(PruneCall {
            namespace: request.namespace.to_string(),
            dry_run: request.dry_run,
            applied: request.applied.iter().cloned().collect(),
        });

        let live: Vec<(String, ObjectRef)> = self
            .cluster(request.namespace)
            .into_iter()
            .map(|o| ("core/v1/ConfigMap".to_string(), o))
            .collect();
        let candidates = prune_candidates(live, request.applied, request.blacklist);

        if !request.dry_run && !candidates.is_empty() {
            let mut cluster = self.cluster.lock().unwrap();
            if let Some(objects) = cluster.get_mut(request.namespace) {
                for object in &candidates {
                    objects.remove(object);
                    self.mutations.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        Ok(candidates
            .into_iter()
            .map(|object| PruneOutcome {
                object,
                error: None,
            })
            .collect())
    }
}
