//! Publication of finished runs.

pub mod broadcast;
pub mod history;

use std::sync::Arc;

use crate::model::RunResult;

pub use broadcast::ResultBroadcaster;
pub use history::{HistoryStats, RunHistory};

/// Receives every finished run exactly once.
///
/// `publish` is called from worker tasks and must not block.
pub trait ResultSink: Send + Sync {
    fn publish(&self, result: Arc<RunResult>);
}

/// Forwards each result to several sinks, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ResultSink for FanoutSink {
    fn publish(&self, result: Arc<RunResult>) {
        for sink in &self.sinks {
            sink.publish(Arc::clone(&result));
        }
    }
}
