use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{EntityKey, ItemCode, RaceContext};
use crate::error::ClassifierError;

/// One tracked per-player field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Position,
    ItemSlot1,
    ItemSlot2,
    Coins,
    LapNum,
    RaceLaps,
}

impl StatKind {
    pub const ALL: [StatKind; 6] = [
        StatKind::Position,
        StatKind::ItemSlot1,
        StatKind::ItemSlot2,
        StatKind::Coins,
        StatKind::LapNum,
        StatKind::RaceLaps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Position => "position",
            StatKind::ItemSlot1 => "item_slot_1",
            StatKind::ItemSlot2 => "item_slot_2",
            StatKind::Coins => "coins",
            StatKind::LapNum => "lap_num",
            StatKind::RaceLaps => "race_laps",
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, StatKind::ItemSlot1 | StatKind::ItemSlot2)
    }

    /// Checks that a classifier produced the right family of value for this kind.
    pub fn accept(&self, value: FieldValue) -> Result<FieldValue, ClassifierError> {
        match (self.is_item(), value) {
            (true, FieldValue::Item(_)) | (false, FieldValue::Number(_)) => Ok(value),
            _ => Err(ClassifierError::UnexpectedReading {
                kind: *self,
                found: value.family(),
            }),
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value as produced by a classifier or returned by a statistics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(u32),
    Item(ItemCode),
}

impl FieldValue {
    pub fn family(&self) -> &'static str {
        match self {
            FieldValue::Number(_) => "number",
            FieldValue::Item(_) => "item",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Item(item) => write!(f, "{item}"),
        }
    }
}

/// Unsmoothed per-frame reading for one entity. `None` means the classifier was
/// disabled or failed, which is different from a legitimate zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    pub entity: EntityKey,
    pub frame_index: u64,
    pub position: Option<u32>,
    pub item_slot_1: Option<ItemCode>,
    pub item_slot_2: Option<ItemCode>,
    pub coins: Option<u32>,
    pub lap_num: Option<u32>,
    pub race_laps: Option<u32>,
}

impl RawObservation {
    pub fn empty(entity: EntityKey, frame_index: u64) -> Self {
        Self {
            entity,
            frame_index,
            position: None,
            item_slot_1: None,
            item_slot_2: None,
            coins: None,
            lap_num: None,
            race_laps: None,
        }
    }

    /// Stores a reading for `kind`. The value family must already have been checked.
    pub fn set(&mut self, kind: StatKind, value: FieldValue) {
        match (kind, value) {
            (StatKind::Position, FieldValue::Number(n)) => self.position = Some(n),
            (StatKind::Coins, FieldValue::Number(n)) => self.coins = Some(n),
            (StatKind::LapNum, FieldValue::Number(n)) => self.lap_num = Some(n),
            (StatKind::RaceLaps, FieldValue::Number(n)) => self.race_laps = Some(n),
            (StatKind::ItemSlot1, FieldValue::Item(item)) => self.item_slot_1 = Some(item),
            (StatKind::ItemSlot2, FieldValue::Item(item)) => self.item_slot_2 = Some(item),
            _ => {}
        }
    }

    pub fn get(&self, kind: StatKind) -> Option<FieldValue> {
        match kind {
            StatKind::Position => self.position.map(FieldValue::Number),
            StatKind::ItemSlot1 => self.item_slot_1.map(FieldValue::Item),
            StatKind::ItemSlot2 => self.item_slot_2.map(FieldValue::Item),
            StatKind::Coins => self.coins.map(FieldValue::Number),
            StatKind::LapNum => self.lap_num.map(FieldValue::Number),
            StatKind::RaceLaps => self.race_laps.map(FieldValue::Number),
        }
    }

    pub fn absent_count(&self) -> usize {
        StatKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_none())
            .count()
    }
}

/// Position value classifiers report when no rank could be read.
pub const NO_POSITION: u32 = 0;

/// Six fully resolved field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Readings {
    pub position: u32,
    pub item_slot_1: ItemCode,
    pub item_slot_2: ItemCode,
    pub coins: u32,
    pub lap_num: u32,
    pub race_laps: u32,
}

impl Default for Readings {
    /// Used when a field has never been observed for an entity.
    fn default() -> Self {
        Self {
            position: NO_POSITION,
            item_slot_1: ItemCode::None,
            item_slot_2: ItemCode::None,
            coins: 0,
            lap_num: 1,
            race_laps: 3,
        }
    }
}

impl Readings {
    pub fn get(&self, kind: StatKind) -> FieldValue {
        match kind {
            StatKind::Position => FieldValue::Number(self.position),
            StatKind::ItemSlot1 => FieldValue::Item(self.item_slot_1),
            StatKind::ItemSlot2 => FieldValue::Item(self.item_slot_2),
            StatKind::Coins => FieldValue::Number(self.coins),
            StatKind::LapNum => FieldValue::Number(self.lap_num),
            StatKind::RaceLaps => FieldValue::Number(self.race_laps),
        }
    }
}

/// Smoothed, fully resolved output of the corrector for one entity at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectedState {
    pub entity: EntityKey,
    pub frame_index: u64,
    pub race: RaceContext,
    #[serde(flatten)]
    pub readings: Readings,
}

impl CorrectedState {
    /// True when both states carry the same six field values, whatever their frames.
    pub fn same_readings(&self, other: &CorrectedState) -> bool {
        self.readings == other.readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PlayerSlot, SourceId};

    fn entity() -> EntityKey {
        EntityKey::new(SourceId(0), PlayerSlot::P1)
    }

    #[test]
    fn accept_rejects_wrong_value_family() {
        assert!(StatKind::Coins.accept(FieldValue::Number(3)).is_ok());
        assert!(StatKind::ItemSlot1.accept(FieldValue::Item(ItemCode::Star)).is_ok());
        assert_eq!(
            StatKind::Position.accept(FieldValue::Item(ItemCode::Banana)),
            Err(ClassifierError::UnexpectedReading {
                kind: StatKind::Position,
                found: "item"
            })
        );
    }

    #[test]
    fn set_and_get_round_trip_per_kind() {
        let mut obs = RawObservation::empty(entity(), 10);
        assert_eq!(obs.absent_count(), 6);
        obs.set(StatKind::Coins, FieldValue::Number(7));
        obs.set(StatKind::ItemSlot2, FieldValue::Item(ItemCode::Boo));
        assert_eq!(obs.get(StatKind::Coins), Some(FieldValue::Number(7)));
        assert_eq!(obs.get(StatKind::ItemSlot2), Some(FieldValue::Item(ItemCode::Boo)));
        assert_eq!(obs.get(StatKind::Position), None);
        assert_eq!(obs.absent_count(), 4);
    }

    #[test]
    fn same_readings_ignores_frame_index() {
        let a = CorrectedState {
            entity: entity(),
            frame_index: 1,
            race: RaceContext(0),
            readings: Readings::default(),
        };
        let b = CorrectedState { frame_index: 2, ..a };
        assert!(a.same_readings(&b));
        let c = CorrectedState {
            readings: Readings { coins: 1, ..a.readings },
            ..a
        };
        assert!(!a.same_readings(&c));
    }
}
