//! Reconciliation targets.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::run::RunResult;

/// A namespace-scoped reconciliation unit.
///
/// Configuration fields are owned by the target source; `status` is written only by the
/// worker holding the target's run lease.
#[derive(Debug, Clone)]
pub struct Target {
    /// Namespace the target's manifests are applied to. Also the target's identity.
    pub namespace: String,
    /// Directory under the manifest root holding this target's manifests.
    pub subpath: String,
    /// Whether the scheduler runs this target on its own. Disabled targets
    /// only run when forced.
    pub auto_apply: bool,
    /// Per-target dry-run override. `None` follows the global setting.
    pub dry_run: Option<bool>,
    /// Per-target periodic interval. `None` uses the process default.
    pub poll_interval: Option<Duration>,
    /// Credential used for apply and prune instead of the controller's own.
    pub credential: Option<Arc<SecretString>>,
    /// Whether the prune pass runs for this target.
    pub prune: bool,
    /// Kinds excluded from pruning for this target, on top of the global blacklist.
    pub prune_blacklist: Vec<String>,
    /// Paths or glob patterns (relative to the subpath) left out of the apply list.
    pub file_blacklist: Vec<String>,
    /// Result of the last completed run.
    pub status: Option<Arc<RunResult>>,
}

impl Target {
    pub fn new(namespace: impl Into<String>, subpath: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subpath: subpath.into(),
            auto_apply: true,
            dry_run: None,
            poll_interval: None,
            credential: None,
            prune: true,
            prune_blacklist: Vec::new(),
            file_blacklist: Vec::new(),
            status: None,
        }
    }

    pub fn with_auto_apply(mut self, enabled: bool) -> Self {
        self.auto_apply = enabled;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_credential(mut self, credential: SecretString) -> Self {
        self.credential = Some(Arc::new(credential));
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_file_blacklist(mut self, patterns: Vec<String>) -> Self {
        self.file_blacklist = patterns;
        self
    }

    pub fn with_prune_blacklist(mut self, kinds: Vec<String>) -> Self {
        self.prune_blacklist = kinds;
        self
    }

    /// Dry-run flag after applying the per-target override.
    pub fn effective_dry_run(&self, global: bool) -> bool {
        self.dry_run.unwrap_or(global)
    }

    /// Periodic interval after applying the per-target override.
    pub fn effective_poll_interval(&self, default: Duration) -> Duration {
        self.poll_interval.unwrap_or(default)
    }
}
