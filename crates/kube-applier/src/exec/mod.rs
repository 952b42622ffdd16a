//! The apply executor capability used by workers.
//!
//! Workers only talk to [`ApplyExecutor`]; [`KubectlExecutor`] is the
//! production implementation, tests substitute in-memory fakes.

pub mod classify;
pub mod kubectl;

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::applylist::PruneBlacklist;
use crate::error::ExecError;
use crate::model::{ObjectRef, PruneOutcome};

pub use classify::classify_kubectl_error;
pub use kubectl::KubectlExecutor;

/// Apply one manifest file.
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    pub file: &'a Path,
    pub namespace: &'a str,
    pub credential: Option<&'a SecretString>,
    pub dry_run: bool,
}

/// What an apply produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutput {
    pub objects: Vec<ObjectRef>,
    pub output: String,
}

/// Prune stale objects from one namespace.
#[derive(Debug, Clone, Copy)]
pub struct PruneRequest<'a> {
    pub namespace: &'a str,
    pub credential: Option<&'a SecretString>,
    /// Kind identifiers (`group/version/Kind`) to look at.
    pub managed_kinds: &'a [String],
    /// Kinds never deleted.
    pub blacklist: &'a PruneBlacklist,
    /// Objects produced by this run's apply pass; these are kept.
    pub applied: &'a BTreeSet<ObjectRef>,
    pub dry_run: bool,
}

#[async_trait]
pub trait ApplyExecutor: Send + Sync {
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<ApplyOutput, ExecError>;

    /// Deletes live objects of managed, non-blacklisted kinds that are not in
    /// `applied`. Only objects this system applied are candidates; objects
    /// owned by a controller or created by other clients are never touched.
    /// Per-object failures are reported in the outcomes; `Err`
    /// means the pass as a whole could not run.
    async fn prune(&self, request: PruneRequest<'_>) -> Result<Vec<PruneOutcome>, ExecError>;
}

/// Live objects to delete: those of non-blacklisted kinds that the current
/// apply pass did not produce. `live` pairs each object with the kind
/// identifier it was listed under. Sorted, without duplicates.
pub fn prune_candidates<I>(
    live: I,
    applied: &BTreeSet<ObjectRef>,
    blacklist: &PruneBlacklist,
) -> Vec<ObjectRef>
where
    I: IntoIterator<Item = (String, ObjectRef)>,
{
    live.into_iter()
        .filter(|(kind, _)| !blacklist.contains(kind))
        .map(|(_, object)| object)
        .filter(|object| !applied.contains(object))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
