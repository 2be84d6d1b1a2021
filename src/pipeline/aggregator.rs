use serde::Serialize;

use crate::common::{EntityKey, ItemCode};
use crate::error::StatsError;
use crate::pipeline::observation::{CorrectedState, FieldValue, StatKind};
use crate::pipeline::timeline::Timeline;

/// Running statistics for one entity: one timeline per tracked field.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStats {
    pub entity: EntityKey,
    pub total_frames: u64,
    pub position: Timeline<u32>,
    pub item_slot_1: Timeline<ItemCode>,
    pub item_slot_2: Timeline<ItemCode>,
    pub coins: Timeline<u32>,
    pub lap_num: Timeline<u32>,
    pub race_laps: Timeline<u32>,
}

impl EntityStats {
    pub fn new(entity: EntityKey) -> Self {
        Self {
            entity,
            total_frames: 0,
            position: Timeline::new(),
            item_slot_1: Timeline::new(),
            item_slot_2: Timeline::new(),
            coins: Timeline::new(),
            lap_num: Timeline::new(),
            race_laps: Timeline::new(),
        }
    }

    /// Extends every timeline with `state`. Returns the kinds that changed value.
    pub fn record(&mut self, state: &CorrectedState) -> Vec<StatKind> {
        let frame = state.frame_index;
        let r = &state.readings;
        self.total_frames += 1;

        let changed = [
            (StatKind::Position, self.position.record(frame, r.position)),
            (StatKind::ItemSlot1, self.item_slot_1.record(frame, r.item_slot_1)),
            (StatKind::ItemSlot2, self.item_slot_2.record(frame, r.item_slot_2)),
            (StatKind::Coins, self.coins.record(frame, r.coins)),
            (StatKind::LapNum, self.lap_num.record(frame, r.lap_num)),
            (StatKind::RaceLaps, self.race_laps.record(frame, r.race_laps)),
        ];
        changed
            .into_iter()
            .filter_map(|(kind, new_run)| new_run.then_some(kind))
            .collect()
    }

    pub fn value_at(&self, kind: StatKind, frame: u64) -> Result<FieldValue, StatsError> {
        match kind {
            StatKind::Position => self.position.value_at(frame).map(FieldValue::Number),
            StatKind::ItemSlot1 => self.item_slot_1.value_at(frame).map(FieldValue::Item),
            StatKind::ItemSlot2 => self.item_slot_2.value_at(frame).map(FieldValue::Item),
            StatKind::Coins => self.coins.value_at(frame).map(FieldValue::Number),
            StatKind::LapNum => self.lap_num.value_at(frame).map(FieldValue::Number),
            StatKind::RaceLaps => self.race_laps.value_at(frame).map(FieldValue::Number),
        }
    }

    pub fn frames_with(&self, kind: StatKind, value: FieldValue) -> Result<u64, StatsError> {
        let mismatch = || StatsError::KindMismatch {
            kind,
            found: value.family(),
        };
        match (kind, value) {
            (StatKind::Position, FieldValue::Number(n)) => Ok(self.position.frames_with(&n)),
            (StatKind::Coins, FieldValue::Number(n)) => Ok(self.coins.frames_with(&n)),
            (StatKind::LapNum, FieldValue::Number(n)) => Ok(self.lap_num.frames_with(&n)),
            (StatKind::RaceLaps, FieldValue::Number(n)) => Ok(self.race_laps.frames_with(&n)),
            (StatKind::ItemSlot1, FieldValue::Item(item)) => Ok(self.item_slot_1.frames_with(&item)),
            (StatKind::ItemSlot2, FieldValue::Item(item)) => Ok(self.item_slot_2.frames_with(&item)),
            _ => Err(mismatch()),
        }
    }

    pub fn current(&self, kind: StatKind) -> Option<FieldValue> {
        match kind {
            StatKind::Position => self.position.current().map(FieldValue::Number),
            StatKind::ItemSlot1 => self.item_slot_1.current().map(FieldValue::Item),
            StatKind::ItemSlot2 => self.item_slot_2.current().map(FieldValue::Item),
            StatKind::Coins => self.coins.current().map(FieldValue::Number),
            StatKind::LapNum => self.lap_num.current().map(FieldValue::Number),
            StatKind::RaceLaps => self.race_laps.current().map(FieldValue::Number),
        }
    }

    /// Sum of run lengths for `kind`; always equal to `total_frames`.
    pub fn run_length_total(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::Position => self.position.run_length_total(),
            StatKind::ItemSlot1 => self.item_slot_1.run_length_total(),
            StatKind::ItemSlot2 => self.item_slot_2.run_length_total(),
            StatKind::Coins => self.coins.run_length_total(),
            StatKind::LapNum => self.lap_num.run_length_total(),
            StatKind::RaceLaps => self.race_laps.run_length_total(),
        }
    }

    /// Mean race position over all observed frames, ignoring unread positions.
    pub fn average_position(&self) -> Option<f64> {
        let (sum, count) = self
            .position
            .distribution()
            .iter()
            .filter(|(position, _)| **position != 0)
            .fold((0u64, 0u64), |(sum, count), (position, frames)| {
                (sum + u64::from(*position) * frames, count + frames)
            });
        (count > 0).then(|| sum as f64 / count as f64)
    }

    pub fn average_coins(&self) -> Option<f64> {
        let (sum, count) = self
            .coins
            .distribution()
            .iter()
            .fold((0u64, 0u64), |(sum, count), (coins, frames)| {
                (sum + u64::from(*coins) * frames, count + frames)
            });
        (count > 0).then(|| sum as f64 / count as f64)
    }
}
