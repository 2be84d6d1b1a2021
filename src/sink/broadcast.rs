use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::SinkError;
use crate::sink::{EventRecord, Sink};

/// In-process event bus. Subscribers that fall behind lose the oldest events.
pub struct BroadcastSink {
    tx: broadcast::Sender<EventRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Sink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn publish(&self, event: &EventRecord) -> Result<(), SinkError> {
        // no subscribers is not a failure: the bus simply has nobody listening
        if self.tx.send(event.clone()).is_err() {
            debug!("No subscribers for event of {}", event.entity());
        }
        Ok(())
    }
}
