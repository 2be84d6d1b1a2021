use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::common::{EntityKey, RaceContext};
use crate::error::StoreError;
use crate::pipeline::CorrectedState;
use crate::sink::EventStore;

type Key = (RaceContext, EntityKey);

/// Volatile store keyed like the on-disk one: a later write for the same race, frame and
/// player replaces the earlier row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<Key, BTreeMap<u64, CorrectedState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored state for `entity`, oldest first across races.
    pub fn history(&self, entity: EntityKey) -> Vec<CorrectedState> {
        self.lock()
            .iter()
            .filter(|((_, key), _)| *key == entity)
            .flat_map(|(_, rows)| rows.values().copied())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, BTreeMap<u64, CorrectedState>>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_event(
        &self,
        race: RaceContext,
        frame_index: u64,
        entity: EntityKey,
        state: &CorrectedState,
    ) -> Result<(), StoreError> {
        self.lock()
            .entry((race, entity))
            .or_default()
            .insert(frame_index, *state);
        Ok(())
    }

    async fn get_previous_events(
        &self,
        race: RaceContext,
        entity: EntityKey,
        limit: usize,
    ) -> Result<Vec<CorrectedState>, StoreError> {
        let rows = self.lock();
        let Some(states) = rows.get(&(race, entity)) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<CorrectedState> = states.values().rev().take(limit).copied().collect();
        recent.reverse();
        Ok(recent)
    }
}
