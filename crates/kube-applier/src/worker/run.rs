//! Execution of a single run: snapshot, apply list, apply, prune, report.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};

use crate::applylist::{build_apply_list, FileBlacklist, PruneBlacklist};
use crate::config::Settings;
use crate::error::ExecError;
use crate::exec::{ApplyExecutor, ApplyRequest, PruneRequest};
use crate::model::{ApplyOutcome, ObjectRef, PruneStatus, Run, RunRequest, RunResult, Target};
use crate::sink::ResultSink;
use crate::source::{ManifestSnapshot, ManifestSource, TargetSource};

/// Executes runs against the collaborators. Shared by all workers.
pub struct RunExecutor {
    settings: Arc<Settings>,
    prune_blacklist: PruneBlacklist,
    manifests: Arc<dyn ManifestSource>,
    targets: Arc<dyn TargetSource>,
    executor: Arc<dyn ApplyExecutor>,
    sink: Arc<dyn ResultSink>,
}

impl RunExecutor {
    pub fn new(
        settings: Arc<Settings>,
        manifests: Arc<dyn ManifestSource>,
        targets: Arc<dyn TargetSource>,
        executor: Arc<dyn ApplyExecutor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let prune_blacklist = PruneBlacklist::new(&settings.prune_blacklist);
        Self {
            settings,
            prune_blacklist,
            manifests,
            targets,
            executor,
            sink,
        }
    }

    /// Runs one request to completion and publishes its result. Never fails;
    /// every error ends up in the result.
    pub async fn execute(&self, request: RunRequest) -> Arc<RunResult> {
        let dry_run = request.target.effective_dry_run(self.settings.dry_run);
        let run = Run::start(request, dry_run);
        let span = tracing::info_span!(
            "run",
            id = %run.id,
            namespace = %run.request.target.namespace,
            kind = %run.request.kind,
        );
        self.execute_run(run).instrument(span).await
    }

    async fn execute_run(&self, mut run: Run) -> Arc<RunResult> {
        info!(revision = %run.request.revision, dry_run = run.dry_run, "Run started");

        match self.manifests.snapshot().await {
            Ok(snapshot) => {
                if snapshot.revision() != run.request.revision {
                    debug!(
                        requested = %run.request.revision,
                        snapshot = %snapshot.revision(),
                        "Running against a newer revision"
                    );
                    run.request.revision = snapshot.revision().to_string();
                }
                self.apply_all(&mut run, &snapshot).await;
                self.prune(&mut run).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to snapshot manifests");
                run.error = Some(e.to_string());
            }
        }

        let diff_url = self.settings.diff_url(&run.request.revision);
        let result = Arc::new(run.finish(diff_url));
        info!(
            success = result.success,
            applied = result.applied_count(),
            failed = result.failed_count(),
            duration_ms = result.duration_ms,
            "Run finished"
        );

        if let Err(e) = self
            .targets
            .update_status(&result.namespace, Arc::clone(&result))
            .await
        {
            warn!(error = %e, "Failed to write target status");
        }
        self.sink.publish(Arc::clone(&result));
        result
    }

    async fn apply_all(&self, run: &mut Run, snapshot: &ManifestSnapshot) {
        let target = run.request.target.clone();
        let blacklist = FileBlacklist::new(
            self.settings
                .file_blacklist
                .iter()
                .chain(target.file_blacklist.iter()),
        );
        run.apply_list = build_apply_list(snapshot.root(), &target.subpath, &blacklist);
        debug!(files = run.apply_list.len(), "Built apply list");

        for file in run.apply_list.clone() {
            let outcome = self
                .apply_file(snapshot.root(), file, &target, run.dry_run)
                .await;
            run.apply.push(outcome);
        }
    }

    async fn apply_file(
        &self,
        root: &Path,
        file: String,
        target: &Target,
        dry_run: bool,
    ) -> ApplyOutcome {
        let path = root.join(&file);
        let request = ApplyRequest {
            file: &path,
            namespace: &target.namespace,
            credential: target.credential.as_deref(),
            dry_run,
        };

        let (result, attempts) = self.invoke(move || self.executor.apply(request)).await;
        match result {
            Ok(output) => {
                debug!(file = %file, objects = output.objects.len(), attempts, "Applied");
                ApplyOutcome {
                    file,
                    objects: output.objects,
                    output: output.output,
                    error: None,
                    attempts,
                }
            }
            Err(e) => {
                warn!(file = %file, error = %e, attempts, "Apply failed");
                ApplyOutcome {
                    file,
                    objects: Vec::new(),
                    output: String::new(),
                    error: Some(e.to_string()),
                    attempts,
                }
            }
        }
    }

    async fn prune(&self, run: &mut Run) {
        let target = &run.request.target;
        if !target.prune {
            run.prune = PruneStatus::Disabled;
            return;
        }
        if run.apply_failed() {
            info!("Skipping prune because an apply step failed");
            run.prune = PruneStatus::Skipped {
                reason: "an apply step failed".to_string(),
            };
            return;
        }

        let applied: BTreeSet<ObjectRef> = run
            .apply
            .iter()
            .flat_map(|o| o.objects.iter().cloned())
            .collect();
        let blacklist = self.prune_blacklist.with_additions(&target.prune_blacklist);
        let request = PruneRequest {
            namespace: &target.namespace,
            credential: target.credential.as_deref(),
            managed_kinds: &self.settings.prune_kinds,
            blacklist: &blacklist,
            applied: &applied,
            dry_run: run.dry_run,
        };

        let (result, attempts) = self.invoke(move || self.executor.prune(request)).await;
        run.prune = match result {
            Ok(objects) => {
                info!(pruned = objects.len(), attempts, "Prune completed");
                PruneStatus::Completed { objects }
            }
            Err(e) => {
                warn!(error = %e, attempts, "Prune failed");
                PruneStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
    }

    /// Calls the executor with the per-invocation timeout, retrying
    /// transient failures with exponential backoff. Returns the final result
    /// and the number of attempts made.
    async fn invoke<T, F, Fut>(&self, mut call: F) -> (Result<T, ExecError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecError>>,
    {
        let timeout = self.settings.exec_timeout();
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ExecError::Timeout(timeout.as_secs())),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.settings.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient executor failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempt),
            }
        }
    }
}
