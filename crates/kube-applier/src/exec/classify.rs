//! kubectl output parsing and error classification.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ExecError;
use crate::model::ObjectRef;

/// Annotation `kubectl apply` records on every object it creates or updates.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Classifies kubectl stderr into a transient or a rejected failure.
pub fn classify_kubectl_error(stderr: &str) -> ExecError {
    let lower = stderr.to_lowercase();

    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("i/o timeout")
        || lower.contains("tls handshake timeout")
        || lower.contains("unable to connect to the server")
        || lower.contains("no route to host")
        || lower.contains("service unavailable")
        || lower.contains("too many requests")
        || lower.contains("the server is currently unable to handle the request")
        || lower.contains("etcdserver: request timed out")
        || lower.contains("context deadline exceeded")
        || lower.contains("unexpected eof")
    {
        return ExecError::Transient(stderr.trim().to_string());
    }

    ExecError::Rejected(stderr.trim().to_string())
}

/// Parses `-o name` output (`resource/name` per line). Lines that are not
/// object references are skipped.
pub fn parse_object_names(output: &str) -> Vec<ObjectRef> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<ObjectRef>().ok())
        .collect()
}

/// Converts a `group/version/Kind` identifier into the resource argument
/// kubectl accepts (`Kind.version.group`, or just `Kind` for the core group).
pub fn kind_to_resource(kind: &str) -> Option<String> {
    let mut parts = kind.split('/');
    let (group, version, name) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || version.is_empty() || name.is_empty() {
        return None;
    }

    if group.is_empty() || group == "core" {
        Some(name.to_string())
    } else {
        Some(format!("{}.{}.{}", name, version, group))
    }
}

/// Converts a `group/version/Kind` identifier into the prefix kubectl prints
/// with `-o name` (`deployment.apps`, or `configmap` for the core group).
pub fn kind_to_name_prefix(kind: &str) -> Option<String> {
    kind_to_resource(kind)?;
    let mut parts = kind.split('/');
    let (group, _, name) = (parts.next()?, parts.next()?, parts.next()?);
    let name = name.to_lowercase();
    if group.is_empty() || group == "core" {
        Some(name)
    } else {
        Some(format!("{}.{}", name, group))
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ListedObject>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    metadata: ListedMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedMetadata {
    name: String,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
    #[serde(default)]
    owner_references: Option<Vec<serde_json::Value>>,
}

impl ListedMetadata {
    /// Applied with `kubectl apply` and not owned by a controller.
    fn is_apply_managed(&self) -> bool {
        let applied = self
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(LAST_APPLIED_ANNOTATION));
        let owned = self
            .owner_references
            .as_ref()
            .is_some_and(|refs| !refs.is_empty());
        applied && !owned
    }
}

/// Parses `get -o json` list output into the objects `kubectl apply` manages.
///
/// Objects without the last-applied annotation were created by something
/// else (the API server, an operator, a user) and objects with owner
/// references belong to a controller; neither is returned.
pub fn parse_applied_objects(output: &str, prefix: &str) -> Result<Vec<ObjectRef>, serde_json::Error> {
    let list: ObjectList = serde_json::from_str(output)?;
    Ok(list
        .items
        .into_iter()
        .filter(|item| item.metadata.is_apply_managed())
        .map(|item| ObjectRef::new(prefix, item.metadata.name))
        .collect())
}

/// True when kubectl reports that a resource type does not exist on the
/// cluster (e.g. a CRD that is not installed).
pub fn is_unknown_resource(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("the server doesn't have a resource type")
        || lower.contains("doesn't have a resource type")
}
