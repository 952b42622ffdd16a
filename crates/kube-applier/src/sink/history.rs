//! Capped, in-memory run history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use super::ResultSink;
use crate::model::RunResult;

/// Aggregate counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dry_runs: u64,
}

#[derive(Default)]
struct HistoryState {
    runs: VecDeque<Arc<RunResult>>,
    latest: HashMap<String, Arc<RunResult>>,
    stats: HistoryStats,
}

/// Keeps the most recent runs (oldest evicted first) and the latest run of
/// every target. Readers never block workers for longer than a push.
pub struct RunHistory {
    capacity: usize,
    state: RwLock<HistoryState>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RwLock::new(HistoryState {
                runs: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `limit` runs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<RunResult>> {
        self.state
            .read()
            .map(|s| s.runs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, namespace: &str) -> Option<Arc<RunResult>> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.latest.get(namespace).cloned())
    }

    /// Runs of one target still held in the history, newest first.
    pub fn for_target(&self, namespace: &str) -> Vec<Arc<RunResult>> {
        self.state
            .read()
            .map(|s| {
                s.runs
                    .iter()
                    .rev()
                    .filter(|r| r.namespace == namespace)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> HistoryStats {
        self.state.read().map(|s| s.stats).unwrap_or_default()
    }

    fn record(&self, result: Arc<RunResult>) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.stats.total += 1;
        if result.success {
            state.stats.succeeded += 1;
        } else {
            state.stats.failed += 1;
        }
        if result.dry_run {
            state.stats.dry_runs += 1;
        }

        state
            .latest
            .insert(result.namespace.clone(), Arc::clone(&result));
        while state.runs.len() >= self.capacity {
            state.runs.pop_front();
        }
        state.runs.push_back(result);
    }
}

impl ResultSink for RunHistory {
    fn publish(&self, result: Arc<RunResult>) {
        self.record(result);
    }
}
