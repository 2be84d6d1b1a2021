use indexmap::IndexMap;
use std::collections::VecDeque;
use std::hash::Hash;

use crate::common::{EntityKey, RaceContext};
use crate::pipeline::observation::{CorrectedState, NO_POSITION, RawObservation, Readings};

/// Fixed-capacity ring buffer of recent readings for one entity, oldest first.
///
/// Eviction is by arrival order only: a repeated frame index still takes a slot.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    entries: VecDeque<Readings>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `readings` and returns the entry evicted to make room, if any.
    pub fn push(&mut self, readings: Readings) -> Option<Readings> {
        self.entries.push_back(readings);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<&Readings> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Readings> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Most frequent value in `values`.
///
/// Ties go to the candidate that appears first in iteration order (for a window:
/// the oldest first occurrence). Returns `None` for an empty input.
pub fn majority<T, I>(values: I) -> Option<T>
where
    T: Copy + Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut tally: IndexMap<T, usize> = IndexMap::new();
    for value in values {
        *tally.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in tally {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value)
}

/// Sliding-window anomaly corrector for a single entity.
///
/// Cold until the first observation lands in the window, warm afterwards; it has no
/// terminal state.
#[derive(Debug, Clone)]
pub struct SlidingWindowCorrector {
    entity: EntityKey,
    window: HistoryWindow,
}

impl SlidingWindowCorrector {
    pub fn new(entity: EntityKey, window_size: usize) -> Self {
        Self {
            entity,
            window: HistoryWindow::new(window_size),
        }
    }

    pub fn window(&self) -> &HistoryWindow {
        &self.window
    }

    pub fn is_warm(&self) -> bool {
        !self.window.is_empty()
    }

    /// Pre-fills the window with previously corrected readings, oldest first.
    pub fn seed<I>(&mut self, history: I)
    where
        I: IntoIterator<Item = Readings>,
    {
        for readings in history {
            self.window.push(readings);
        }
    }

    /// Gap-fills and zero-corrects `observation`, adds it to the window and returns the
    /// per-field majority over the window.
    pub fn correct(&mut self, observation: &RawObservation, race: RaceContext) -> CorrectedState {
        let repaired = self.repair(observation);
        self.window.push(repaired);

        CorrectedState {
            entity: self.entity,
            frame_index: observation.frame_index,
            race,
            readings: self.resolve().unwrap_or(repaired),
        }
    }

    fn repair(&self, observation: &RawObservation) -> Readings {
        let previous = self.window.latest().copied().unwrap_or_default();

        let mut position = observation.position.unwrap_or(previous.position);
        if position == NO_POSITION {
            // a blank rank display is not a real rank
            if let Some(latest) = self.window.latest() {
                position = latest.position;
            }
        }

        Readings {
            position,
            item_slot_1: observation.item_slot_1.unwrap_or(previous.item_slot_1),
            item_slot_2: observation.item_slot_2.unwrap_or(previous.item_slot_2),
            coins: observation.coins.unwrap_or(previous.coins),
            lap_num: observation.lap_num.unwrap_or(previous.lap_num),
            race_laps: observation.race_laps.unwrap_or(previous.race_laps),
        }
    }

    fn resolve(&self) -> Option<Readings> {
        let entries = &self.window;
        Some(Readings {
            position: majority(entries.iter().map(|r| r.position))?,
            item_slot_1: majority(entries.iter().map(|r| r.item_slot_1))?,
            item_slot_2: majority(entries.iter().map(|r| r.item_slot_2))?,
            coins: majority(entries.iter().map(|r| r.coins))?,
            lap_num: majority(entries.iter().map(|r| r.lap_num))?,
            race_laps: majority(entries.iter().map(|r| r.race_laps))?,
        })
    }
}
