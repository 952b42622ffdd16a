//! Manifest and target sources the scheduler and workers read from.

pub mod manifest;
pub mod target;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{RunResult, Target};

pub use manifest::{GitManifestSource, ManifestSnapshot};
pub use target::StaticTargetSource;

/// Read-only access to the manifest tree.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Latest known revision of the tree.
    async fn current_revision(&self) -> Result<String, SourceError>;

    /// A consistent view of the tree. The tree does not change underneath
    /// the snapshot while it is held.
    async fn snapshot(&self) -> Result<ManifestSnapshot, SourceError>;
}

/// Enumerates targets and persists their status.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn list(&self) -> Result<Vec<Target>, SourceError>;

    async fn update_status(&self, namespace: &str, result: Arc<RunResult>)
        -> Result<(), SourceError>;
}
