use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Target;
use crate::secrets::resolve_secret_optional;

/// Placeholder in `diff_url_format` replaced by the run's revision.
pub const DIFF_URL_PLACEHOLDER: &str = "%s";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the manifest checkout.
    pub repo_path: String,
    /// Number of concurrent workers. `0` means one per available CPU.
    #[serde(default)]
    pub worker_count: usize,
    #[serde(default = "default_git_poll_interval_secs")]
    pub git_poll_interval_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub default_poll_interval_secs: u64,
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
    /// Kinds never pruned, in addition to the built-in ones.
    #[serde(default)]
    pub prune_blacklist: Vec<String>,
    /// Kinds the prune pass looks at.
    #[serde(default = "default_prune_kinds")]
    pub prune_kinds: Vec<String>,
    /// Paths or glob patterns, relative to a target's subpath, never applied.
    #[serde(default)]
    pub file_blacklist: Vec<String>,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// URL template for the diff of a revision, e.g. `https://git.example.com/commit/%s`.
    #[serde(default)]
    pub diff_url_format: String,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_git_poll_interval_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_scheduler_tick_ms() -> u64 {
    1000
}

fn default_exec_timeout_secs() -> u64 {
    180
}

fn default_history_size() -> usize {
    100
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_prune_kinds() -> Vec<String> {
    [
        "core/v1/ConfigMap",
        "core/v1/Endpoints",
        "core/v1/PersistentVolumeClaim",
        "core/v1/Pod",
        "core/v1/ReplicationController",
        "core/v1/Secret",
        "core/v1/Service",
        "core/v1/ServiceAccount",
        "apps/v1/DaemonSet",
        "apps/v1/Deployment",
        "apps/v1/ReplicaSet",
        "apps/v1/StatefulSet",
        "batch/v1/CronJob",
        "networking.k8s.io/v1/Ingress",
        "policy/v1/PodDisruptionBudget",
        "rbac.authorization.k8s.io/v1/Role",
        "rbac.authorization.k8s.io/v1/RoleBinding",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Settings {
    /// Creates settings with every field at its default.
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            worker_count: 0,
            git_poll_interval_secs: default_git_poll_interval_secs(),
            default_poll_interval_secs: default_poll_interval_secs(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            dry_run: false,
            prune_blacklist: Vec::new(),
            prune_kinds: default_prune_kinds(),
            file_blacklist: Vec::new(),
            exec_timeout_secs: default_exec_timeout_secs(),
            retry: RetryConfig::default(),
            diff_url_format: String::new(),
            history_size: default_history_size(),
            kubectl_path: default_kubectl_path(),
            targets: Vec::new(),
        }
    }

    /// Worker count with `0` resolved to the number of available CPUs.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    pub fn git_poll_interval(&self) -> Duration {
        Duration::from_secs(self.git_poll_interval_secs)
    }

    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_secs(self.default_poll_interval_secs)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Renders the diff URL for a revision, if a format is configured.
    pub fn diff_url(&self, revision: &str) -> Option<String> {
        if self.diff_url_format.is_empty() || revision.is_empty() {
            return None;
        }
        Some(
            self.diff_url_format
                .replacen(DIFF_URL_PLACEHOLDER, revision, 1),
        )
    }

    /// Builds the static target list.
    pub fn build_targets(&self) -> Result<Vec<Target>, ConfigError> {
        self.targets.iter().map(TargetConfig::to_target).collect()
    }
}

/// Retry policy for transient apply failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// A statically configured target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub namespace: String,
    /// Directory under the repo root. Defaults to the namespace name.
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default = "default_true")]
    pub auto_apply: bool,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub credential_file: Option<String>,
    #[serde(default)]
    pub credential_env_var: Option<String>,
    #[serde(default = "default_true")]
    pub prune: bool,
    #[serde(default)]
    pub prune_blacklist: Vec<String>,
    #[serde(default)]
    pub file_blacklist: Vec<String>,
}

impl TargetConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subpath: None,
            auto_apply: true,
            dry_run: None,
            poll_interval_secs: None,
            credential: None,
            credential_file: None,
            credential_env_var: None,
            prune: true,
            prune_blacklist: Vec::new(),
            file_blacklist: Vec::new(),
        }
    }

    pub fn subpath(&self) -> &str {
        self.subpath.as_deref().unwrap_or(&self.namespace)
    }

    pub fn to_target(&self) -> Result<Target, ConfigError> {
        let mut target = Target::new(self.namespace.clone(), self.subpath().to_string())
            .with_auto_apply(self.auto_apply)
            .with_prune(self.prune)
            .with_prune_blacklist(self.prune_blacklist.clone())
            .with_file_blacklist(self.file_blacklist.clone());
        target.dry_run = self.dry_run;
        target.poll_interval = self.poll_interval_secs.map(Duration::from_secs);

        let credential = resolve_secret_optional(
            self.credential.as_deref(),
            self.credential_file.as_deref(),
            self.credential_env_var.as_deref(),
        )
        .map_err(|source| ConfigError::Credential {
            namespace: self.namespace.clone(),
            source,
        })?;
        if let Some(credential) = credential {
            target = target.with_credential(credential);
        }

        Ok(target)
    }
}
