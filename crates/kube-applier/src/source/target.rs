//! In-memory target source.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::TargetSource;
use crate::error::SourceError;
use crate::model::{RunResult, Target};

/// Target source backed by a fixed list (typically from the settings file).
///
/// Status is kept in memory and attached to the targets returned by `list`.
/// `set_targets` lets an external watcher replace the list at runtime.
#[derive(Default)]
pub struct StaticTargetSource {
    targets: RwLock<Vec<Target>>,
    statuses: RwLock<HashMap<String, Arc<RunResult>>>,
}

impl StaticTargetSource {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: RwLock::new(targets),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the target list. Status of targets that remain is kept.
    pub fn set_targets(&self, targets: Vec<Target>) {
        let mut statuses = match self.statuses.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses.retain(|ns, _| targets.iter().any(|t| &t.namespace == ns));
        drop(statuses);

        match self.targets.write() {
            Ok(mut guard) => *guard = targets,
            Err(poisoned) => *poisoned.into_inner() = targets,
        }
    }

    pub fn status(&self, namespace: &str) -> Option<Arc<RunResult>> {
        self.statuses
            .read()
            .ok()
            .and_then(|s| s.get(namespace).cloned())
    }
}

#[async_trait]
impl TargetSource for StaticTargetSource {
    async fn list(&self) -> Result<Vec<Target>, SourceError> {
        let targets = self
            .targets
            .read()
            .map_err(|e| SourceError::ListTargets(e.to_string()))?;
        let statuses = self
            .statuses
            .read()
            .map_err(|e| SourceError::ListTargets(e.to_string()))?;

        Ok(targets
            .iter()
            .map(|t| {
                let mut target = t.clone();
                target.status = statuses.get(&t.namespace).cloned();
                target
            })
            .collect())
    }

    async fn update_status(
        &self,
        namespace: &str,
        result: Arc<RunResult>,
    ) -> Result<(), SourceError> {
        let known = self
            .targets
            .read()
            .map(|t| t.iter().any(|t| t.namespace == namespace))
            .unwrap_or(false);
        if !known {
            return Err(SourceError::StatusWrite {
                namespace: namespace.to_string(),
                message: "target no longer exists".to_string(),
            });
        }

        let mut statuses = self
            .statuses
            .write()
            .map_err(|e| SourceError::StatusWrite {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;
        statuses.insert(namespace.to_string(), result);
        Ok(())
    }
}
