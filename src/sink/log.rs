use async_trait::async_trait;
use tracing::info;

use crate::error::SinkError;
use crate::sink::{EventRecord, Sink};

/// Writes every forwarded state change to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, event: &EventRecord) -> Result<(), SinkError> {
        info!(
            race = event.race.0,
            frame = event.frame_index,
            player = event.player_id,
            position = event.position,
            item_1 = %event.item_1,
            item_2 = %event.item_2,
            coins = event.coins,
            lap = event.lap,
            race_laps = event.race_laps,
            "state change for {}",
            event.entity()
        );
        Ok(())
    }
}
