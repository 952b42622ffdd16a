//! Broadcast channel of finished runs for live subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::ResultSink;
use crate::model::RunResult;

pub struct ResultBroadcaster {
    sender: Arc<broadcast::Sender<Arc<RunResult>>>,
}

impl ResultBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribers that lag behind by more than the capacity miss results.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunResult>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ResultBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ResultSink for ResultBroadcaster {
    fn publish(&self, result: Arc<RunResult>) {
        // No active receivers is fine.
        let _ = self.sender.send(result);
    }
}
