//! Git-backed manifest source.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::ManifestSource;
use crate::error::SourceError;
use crate::process::format_command_error;

/// A read-consistent view of the manifest tree.
///
/// Holds the source's read lock (if any) until dropped, so an in-process
/// sync cannot modify the tree while a run reads it.
#[derive(Debug)]
pub struct ManifestSnapshot {
    root: PathBuf,
    revision: String,
    _guard: Option<OwnedRwLockReadGuard<()>>,
}

impl ManifestSnapshot {
    pub fn new(root: impl Into<PathBuf>, revision: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            revision: revision.into(),
            _guard: None,
        }
    }

    fn with_guard(mut self, guard: OwnedRwLockReadGuard<()>) -> Self {
        self._guard = Some(guard);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

/// Reads manifests from a local git checkout kept up to date by someone else
/// (a sidecar, a cron job, or an in-process syncer using [`sync_guard`]).
///
/// The checkout path may be a symlink that a syncer swaps atomically; each
/// snapshot resolves it once and keeps reading the resolved directory.
///
/// [`sync_guard`]: GitManifestSource::sync_guard
pub struct GitManifestSource {
    repo_path: PathBuf,
    sync_lock: Arc<RwLock<()>>,
}

impl GitManifestSource {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            sync_lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Exclusive access for mutating the checkout. Waits for in-flight
    /// snapshots to be dropped.
    pub async fn sync_guard(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.sync_lock).write_owned().await
    }

    async fn resolve_root(&self) -> Result<PathBuf, SourceError> {
        tokio::fs::canonicalize(&self.repo_path)
            .await
            .map_err(|e| SourceError::ResolveRoot {
                path: self.repo_path.clone(),
                source: e,
            })
    }

    async fn head_revision(&self, dir: &Path) -> Result<String, SourceError> {
        if !dir.join(".git").exists() {
            return Err(SourceError::GitNotInitialized(dir.to_path_buf()));
        }

        let output = Command::new("git")
            .current_dir(dir)
            .args(["rev-parse", "HEAD"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SourceError::Git(e.to_string()))?;

        if !output.status.success() {
            return Err(SourceError::Git(format_command_error(&output)));
        }

        let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
        log::debug!("Manifest revision at {}: {}", dir.display(), revision);
        Ok(revision)
    }
}

#[async_trait]
impl ManifestSource for GitManifestSource {
    async fn current_revision(&self) -> Result<String, SourceError> {
        let _guard = self.sync_lock.read().await;
        let root = self.resolve_root().await?;
        self.head_revision(&root).await
    }

    async fn snapshot(&self) -> Result<ManifestSnapshot, SourceError> {
        let guard = Arc::clone(&self.sync_lock).read_owned().await;
        let root = self.resolve_root().await?;
        let revision = self.head_revision(&root).await?;
        Ok(ManifestSnapshot::new(root, revision).with_guard(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.email=test@example.com", "-c", "user.name=Test"])
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"]);
        std::fs::write(dir.path().join("a.yaml"), "kind: ConfigMap\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "first"]);
        dir
    }

    #[tokio::test]
    async fn test_not_a_repo() {
        let dir = TempDir::new().unwrap();
        let source = GitManifestSource::new(dir.path());
        let result = source.current_revision().await;
        assert!(matches!(result, Err(SourceError::GitNotInitialized(_))));
    }

    #[tokio::test]
    async fn test_missing_path() {
        let source = GitManifestSource::new("/nonexistent/kube-applier/repo");
        let result = source.snapshot().await;
        assert!(matches!(result, Err(SourceError::ResolveRoot { .. })));
    }

    #[tokio::test]
    async fn test_revision_changes_with_commit() {
        let dir = init_repo();
        let source = GitManifestSource::new(dir.path());

        let first = source.current_revision().await.unwrap();
        assert_eq!(first.len(), 40);

        std::fs::write(dir.path().join("b.yaml"), "kind: Service\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "second"]);

        let second = source.current_revision().await.unwrap();
        assert_ne!(first, second);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_resolves_symlink() {
        let repo = init_repo();
        let links = TempDir::new().unwrap();
        let link = links.path().join("current");
        std::os::unix::fs::symlink(repo.path(), &link).unwrap();

        let source = GitManifestSource::new(&link);
        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot.root(), repo.path().canonicalize().unwrap());
        assert_eq!(snapshot.revision().len(), 40);
    }

    #[tokio::test]
    async fn test_sync_waits_for_snapshot() {
        let repo = init_repo();
        let source = GitManifestSource::new(repo.path());

        let snapshot = source.snapshot().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), source.sync_guard()).await;
        assert!(blocked.is_err());

        drop(snapshot);
        let acquired = tokio::time::timeout(Duration::from_secs(1), source.sync_guard()).await;
        assert!(acquired.is_ok());
    }
}
