//! `kubectl`-backed executor.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use super::classify::{
    classify_kubectl_error, is_unknown_resource, kind_to_name_prefix, kind_to_resource,
    parse_applied_objects, parse_object_names,
};
use super::{prune_candidates, ApplyExecutor, ApplyOutput, ApplyRequest, PruneRequest};
use crate::error::ExecError;
use crate::model::{ObjectRef, PruneOutcome};
use crate::process::format_command_error;

/// Executes applies and prunes by shelling out to `kubectl`.
///
/// Every invocation is scoped with `-n <namespace>`. Server-side dry-run is
/// used when a request is a dry run, so nothing is mutated. Prune only ever
/// considers objects carrying the `kubectl apply` annotation that no
/// controller owns.
pub struct KubectlExecutor {
    program: PathBuf,
}

impl KubectlExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(
        &self,
        args: Vec<OsString>,
        namespace: &str,
        credential: Option<&SecretString>,
        dry_run: bool,
    ) -> Result<Output, ExecError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .args(["-n", namespace])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if dry_run {
            cmd.arg("--dry-run=server");
        }
        if let Some(token) = credential {
            cmd.arg(format!("--token={}", token.expose_secret()));
        }

        log::debug!(
            "Running kubectl {:?} in namespace {}{}",
            args,
            namespace,
            if credential.is_some() { " with delegated token" } else { "" }
        );
        cmd.output()
            .await
            .map_err(|e| ExecError::Spawn(format!("{}: {}", self.program.display(), e)))
    }

    /// Lists live objects of one kind that `kubectl apply` manages. Kinds the
    /// cluster does not know about yield nothing.
    async fn list_kind(
        &self,
        kind: &str,
        request: &PruneRequest<'_>,
    ) -> Result<Vec<ObjectRef>, ExecError> {
        let (Some(resource), Some(prefix)) = (kind_to_resource(kind), kind_to_name_prefix(kind))
        else {
            log::warn!("Skipping invalid kind identifier: {}", kind);
            return Ok(Vec::new());
        };

        let args = vec!["get".into(), resource.into(), "-o".into(), "json".into()];
        let output = self
            .run(args, request.namespace, request.credential, false)
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_unknown_resource(&stderr) {
                log::debug!("Kind {} not served by the cluster, skipping", kind);
                return Ok(Vec::new());
            }
            return Err(classify_kubectl_error(&format_command_error(&output)));
        }

        parse_applied_objects(&String::from_utf8_lossy(&output.stdout), &prefix)
            .map_err(|e| ExecError::Rejected(format!("Unreadable {} list: {}", kind, e)))
    }

    async fn delete(&self, object: &ObjectRef, request: &PruneRequest<'_>) -> Option<String> {
        let args = vec![
            "delete".into(),
            object.to_string().into(),
            "--ignore-not-found".into(),
        ];
        match self
            .run(args, request.namespace, request.credential, request.dry_run)
            .await
        {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(format_command_error(&output)),
            Err(e) => Some(e.to_string()),
        }
    }
}

impl Default for KubectlExecutor {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl ApplyExecutor for KubectlExecutor {
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<ApplyOutput, ExecError> {
        let args = vec![
            "apply".into(),
            "-f".into(),
            request.file.as_os_str().to_owned(),
            "-o".into(),
            "name".into(),
        ];
        let output = self
            .run(args, request.namespace, request.credential, request.dry_run)
            .await?;

        if !output.status.success() {
            return Err(classify_kubectl_error(&format_command_error(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(ApplyOutput {
            objects: parse_object_names(&stdout),
            output: stdout,
        })
    }

    async fn prune(&self, request: PruneRequest<'_>) -> Result<Vec<PruneOutcome>, ExecError> {
        let mut live = Vec::new();
        for kind in request.managed_kinds {
            if request.blacklist.contains(kind) {
                continue;
            }
            for object in self.list_kind(kind, &request).await? {
                live.push((kind.clone(), object));
            }
        }

        let candidates = prune_candidates(live, request.applied, request.blacklist);
        let mut outcomes = Vec::with_capacity(candidates.len());
        for object in candidates {
            let error = self.delete(&object, &request).await;
            match &error {
                None => log::info!(
                    "Pruned {} from {}{}",
                    object,
                    request.namespace,
                    if request.dry_run { " (dry run)" } else { "" }
                ),
                Some(e) => log::warn!("Failed to prune {} from {}: {}", object, request.namespace, e),
            }
            outcomes.push(PruneOutcome { object, error });
        }

        Ok(outcomes)
    }
}
