//! Lifecycle event publishers.

use job_types::{JobEvent, JobEventPublisher};
use tokio::sync::broadcast;

/// Fans events out to any number of subscribers. Slow subscribers lose the oldest events;
/// publishing never waits.
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<JobEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl JobEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: JobEvent) {
        // Err only means nobody is subscribed.
        let _ = self.tx.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

impl JobEventPublisher for NoopEventPublisher {
    fn publish(&self, _event: JobEvent) {}
}
