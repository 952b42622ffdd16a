//! Shared test utilities for kube-applier integration tests.
//!
//! This module provides:
//! - `FakeManifests` and `FakeExecutor` in-memory collaborators
//! - `TestEnv` wiring them to settings with test-friendly timings

#![allow(dead_code)]

pub mod fakes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube_applier::config::RetryConfig;
use kube_applier::{
    Controller, RunExecutor, RunHistory, RunKind, RunRequest, RunResult, Settings,
    StaticTargetSource, Target,
};

pub use fakes::{ApplyCall, FakeExecutor, FakeManifests, PruneCall, Script};

/// Settings with short timings for tests.
pub fn test_settings(manifests: &FakeManifests) -> Settings {
    let mut settings = Settings::new(manifests.root().display().to_string());
    settings.worker_count = 2;
    settings.git_poll_interval_secs = 3600;
    settings.default_poll_interval_secs = 3600;
    settings.scheduler_tick_ms = 10;
    settings.exec_timeout_secs = 5;
    settings.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 40,
    };
    settings
}

/// Collaborators plus settings for one test.
pub struct TestEnv {
    pub manifests: Arc<FakeManifests>,
    pub executor: Arc<FakeExecutor>,
    pub settings: Settings,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_executor(FakeExecutor::new())
    }

    pub fn with_executor(executor: Arc<FakeExecutor>) -> Self {
        let manifests = FakeManifests::new();
        let settings = test_settings(&manifests);
        Self {
            manifests,
            executor,
            settings,
        }
    }

    /// A run executor publishing into the returned history.
    pub fn runner(&self, targets: Vec<Target>) -> (RunExecutor, Arc<RunHistory>, Arc<StaticTargetSource>) {
        let history = Arc::new(RunHistory::new(self.settings.history_size));
        let target_source = Arc::new(StaticTargetSource::new(targets));
        let runner = RunExecutor::new(
            Arc::new(self.settings.clone()),
            self.manifests.clone(),
            target_source.clone(),
            self.executor.clone(),
            history.clone(),
        );
        (runner, history, target_source)
    }

    pub fn controller(&self, targets: Vec<Target>) -> Controller {
        Controller::new(
            self.settings.clone(),
            self.manifests.clone(),
            Arc::new(StaticTargetSource::new(targets)),
            self.executor.clone(),
        )
    }
}

pub fn forced(target: &Target) -> RunRequest {
    RunRequest::new(target.clone(), RunKind::Forced, "rev-1")
}

pub fn failed_files(result: &RunResult) -> Vec<String> {
    result
        .apply
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.file.clone())
        .collect()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
