//! Run requests, in-flight runs and their results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::target::Target;

/// Why a run was requested, ordered by urgency.
///
/// Only used for audit and logging; every kind executes the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Periodic,
    CommitTriggered,
    Forced,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Periodic => write!(f, "periodic"),
            RunKind::CommitTriggered => write!(f, "commit-triggered"),
            RunKind::Forced => write!(f, "forced"),
        }
    }
}

/// A pending request to reconcile one target.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Target configuration as of the moment the request was produced.
    pub target: Target,
    pub kind: RunKind,
    /// Manifest revision observed when the request was produced.
    pub revision: String,
    pub enqueued_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(target: Target, kind: RunKind, revision: impl Into<String>) -> Self {
        Self {
            target,
            kind,
            revision: revision.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.target.namespace
    }

    /// Merges a newer request for the same target into this one.
    ///
    /// The newer request wins, except that the more urgent kind is kept.
    pub fn coalesce(self, newer: RunRequest) -> RunRequest {
        let kind = self.kind.max(newer.kind);
        RunRequest { kind, ..newer }
    }
}

/// Identity of a cluster object within a target's namespace, in the
/// `resource/name` form kubectl prints (e.g. `deployment.apps/web`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ObjectRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(ObjectRef::new(kind, name))
            }
            _ => Err(format!("Invalid object reference: {}", s)),
        }
    }
}

/// Outcome of applying one manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Manifest path relative to the manifest root.
    pub file: String,
    /// Objects the file produced, when the apply succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectRef>,
    /// Executor output of the last attempt.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of invocations made, including retries.
    pub attempts: u32,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of deleting one stale object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneOutcome {
    pub object: ObjectRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PruneOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What happened in a run's prune pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PruneStatus {
    /// Pruning is turned off for the target.
    Disabled,
    /// The pass did not run, e.g. because an apply step failed.
    Skipped { reason: String },
    Completed { objects: Vec<PruneOutcome> },
    /// The prune invocation as a whole failed.
    Failed { error: String },
}

impl PruneStatus {
    pub fn is_success(&self) -> bool {
        match self {
            PruneStatus::Disabled | PruneStatus::Skipped { .. } => true,
            PruneStatus::Completed { objects } => objects.iter().all(PruneOutcome::is_success),
            PruneStatus::Failed { .. } => false,
        }
    }

    pub fn objects(&self) -> &[PruneOutcome] {
        match self {
            PruneStatus::Completed { objects } => objects,
            _ => &[],
        }
    }
}

/// An in-flight reconciliation of one target.
#[derive(Debug)]
pub struct Run {
    pub id: String,
    pub request: RunRequest,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub apply_list: Vec<String>,
    pub apply: Vec<ApplyOutcome>,
    pub prune: PruneStatus,
    pub error: Option<String>,
}

impl Run {
    pub fn start(request: RunRequest, dry_run: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            dry_run,
            started_at: Utc::now(),
            apply_list: Vec::new(),
            apply: Vec::new(),
            prune: PruneStatus::Disabled,
            error: None,
        }
    }

    pub fn apply_failed(&self) -> bool {
        self.apply.iter().any(|o| !o.is_success())
    }

    /// Freezes the run into its result.
    pub fn finish(self, diff_url: Option<String>) -> RunResult {
        let finished_at = Utc::now();
        let success = self.error.is_none()
            && self.apply.iter().all(ApplyOutcome::is_success)
            && self.prune.is_success();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        RunResult {
            id: self.id,
            namespace: self.request.target.namespace,
            kind: self.request.kind,
            revision: self.request.revision,
            dry_run: self.dry_run,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            apply: self.apply,
            prune: self.prune,
            success,
            error: self.error,
            diff_url,
        }
    }
}

/// Immutable record of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub namespace: String,
    pub kind: RunKind,
    pub revision: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub apply: Vec<ApplyOutcome>,
    pub prune: PruneStatus,
    pub success: bool,
    /// Run-level failure that prevented applying at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_url: Option<String>,
}

impl RunResult {
    pub fn applied_count(&self) -> usize {
        self.apply.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.apply.iter().filter(|o| !o.is_success()).count()
            + self.prune.objects().iter().filter(|o| !o.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(file: &str, error: Option<&str>) -> ApplyOutcome {
        ApplyOutcome {
            file: file.to_string(),
            objects: vec![],
            output: String::new(),
            error: error.map(str::to_string),
            attempts: 1,
        }
    }

    #[test]
    fn test_run_kind_urgency_order() {
        assert!(RunKind::Forced > RunKind::CommitTriggered);
        assert!(RunKind::CommitTriggered > RunKind::Periodic);
    }

    #[test]
    fn test_coalesce_keeps_newest_revision_and_most_urgent_kind() {
        let target = Target::new("team-a", "a");
        let forced = RunRequest::new(target.clone(), RunKind::Forced, "rev-1");
        let periodic = RunRequest::new(target, RunKind::Periodic, "rev-2");

        let merged = forced.coalesce(periodic);
        assert_eq!(merged.kind, RunKind::Forced);
        assert_eq!(merged.revision, "rev-2");
    }

    #[test]
    fn test_object_ref_parse() {
        let obj: ObjectRef = "deployment.apps/web".parse().unwrap();
        assert_eq!(obj.kind, "deployment.apps");
        assert_eq!(obj.name, "web");
        assert_eq!(obj.to_string(), "deployment.apps/web");

        assert!("no-slash".parse::<ObjectRef>().is_err());
        assert!("/name".parse::<ObjectRef>().is_err());
        assert!("a/b/c".parse::<ObjectRef>().is_err());
    }

    #[test]
    fn test_finish_success_requires_all_steps() {
        let request = RunRequest::new(Target::new("team-a", "a"), RunKind::Periodic, "rev");
        let mut run = Run::start(request, false);
        run.apply.push(outcome("a/one.yaml", None));
        run.prune = PruneStatus::Completed {
            objects: vec![PruneOutcome {
                object: ObjectRef::new("configmap", "old"),
                error: Some("forbidden".to_string()),
            }],
        };

        let result = run.finish(None);
        assert!(!result.success);
        assert_eq!(result.applied_count(), 1);
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn test_finish_with_failed_apply() {
        let request = RunRequest::new(Target::new("team-a", "a"), RunKind::Periodic, "rev");
        let mut run = Run::start(request, true);
        run.apply.push(outcome("a/one.yaml", None));
        run.apply.push(outcome("a/two.yaml", Some("invalid")));
        assert!(run.apply_failed());

        let result = run.finish(Some("https://example.com/rev".to_string()));
        assert!(!result.success);
        assert!(result.dry_run);
        assert_eq!(result.diff_url.as_deref(), Some("https://example.com/rev"));
    }

    #[test]
    fn test_prune_status_serialization() {
        let status = PruneStatus::Skipped {
            reason: "apply failed".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"skipped\""));
        assert!(json.contains("apply failed"));
    }
}
