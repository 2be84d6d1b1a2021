pub mod broadcast;
pub mod json_lines;
pub mod log;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::common::{EntityKey, ItemCode, PlayerSlot, RaceContext, SourceId};
use crate::config::DispatchConfig;
use crate::error::{SinkError, StoreError};
use crate::pipeline::{CorrectedState, Readings};

pub use broadcast::BroadcastSink;
pub use json_lines::JsonLinesSink;
pub use log::LogSink;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Wire shape of one published state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub race: RaceContext,
    pub frame_index: u64,
    pub source: SourceId,
    pub slot: PlayerSlot,
    pub player_id: u32,
    pub position: u32,
    pub item_1: ItemCode,
    pub item_2: ItemCode,
    pub coins: u32,
    pub lap: u32,
    pub race_laps: u32,
}

impl EventRecord {
    pub fn entity(&self) -> EntityKey {
        EntityKey::new(self.source, self.slot)
    }

    pub fn into_state(self) -> CorrectedState {
        CorrectedState {
            entity: self.entity(),
            frame_index: self.frame_index,
            race: self.race,
            readings: Readings {
                position: self.position,
                item_slot_1: self.item_1,
                item_slot_2: self.item_2,
                coins: self.coins,
                lap_num: self.lap,
                race_laps: self.race_laps,
            },
        }
    }
}

impl From<&CorrectedState> for EventRecord {
    fn from(state: &CorrectedState) -> Self {
        let r = &state.readings;
        Self {
            race: state.race,
            frame_index: state.frame_index,
            source: state.entity.source,
            slot: state.entity.slot,
            player_id: state.entity.player_id(),
            position: r.position,
            item_1: r.item_slot_1,
            item_2: r.item_slot_2,
            coins: r.coins,
            lap: r.lap_num,
            race_laps: r.race_laps,
        }
    }
}

/// Fire-and-forget publication target such as a message bus.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn publish(&self, event: &EventRecord) -> Result<(), SinkError>;
}

/// Persistent history of forwarded states.
#[async_trait]
pub trait EventStore: Send + Sync {
    fn name(&self) -> &str;

    async fn write_event(
        &self,
        race: RaceContext,
        frame_index: u64,
        entity: EntityKey,
        state: &CorrectedState,
    ) -> Result<(), StoreError>;

    /// Up to `limit` most recent states for `entity` in `race`, oldest first.
    async fn get_previous_events(
        &self,
        race: RaceContext,
        entity: EntityKey,
        limit: usize,
    ) -> Result<Vec<CorrectedState>, StoreError>;
}

/// Sinks and store built from configuration.
#[derive(Default)]
pub struct DispatchTargets {
    pub sinks: Vec<Arc<dyn Sink>>,
    pub store: Option<Arc<dyn EventStore>>,
    /// Kept so callers can subscribe to the in-process bus.
    pub bus: Option<Arc<BroadcastSink>>,
}

pub fn build_targets(config: &DispatchConfig) -> Result<DispatchTargets, SinkError> {
    let mut targets = DispatchTargets::default();
    if config.log_events {
        targets.sinks.push(Arc::new(LogSink::new()));
    }
    if config.broadcast_capacity > 0 {
        let bus = Arc::new(BroadcastSink::new(config.broadcast_capacity));
        targets.sinks.push(bus.clone());
        targets.bus = Some(bus);
    }
    if let Some(path) = &config.json_lines_path {
        targets.sinks.push(Arc::new(JsonLinesSink::open(path)?));
    }
    if let Some(path) = &config.sqlite_path {
        targets.store = Some(Arc::new(SqliteStore::open(path)?));
    }
    Ok(targets)
}
