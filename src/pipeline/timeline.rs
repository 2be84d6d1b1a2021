use indexmap::IndexMap;
use serde::Serialize;
use std::hash::Hash;

use crate::error::StatsError;

/// A maximal stretch of consecutive observations sharing one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run<T> {
    pub start_frame: u64,
    pub value: T,
    /// Number of observations covered by the run.
    pub frames: u64,
}

/// Run-length-encoded history of one field plus its value distribution.
///
/// Runs are contiguous and adjacent runs always hold different values; their lengths
/// sum to `observed()`.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline<T: Hash + Eq> {
    runs: Vec<Run<T>>,
    distribution: IndexMap<T, u64>,
    observed: u64,
}

impl<T> Default for Timeline<T>
where
    T: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timeline<T>
where
    T: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            runs: Vec::new(),
            distribution: IndexMap::new(),
            observed: 0,
        }
    }

    /// Records `value` at `frame`. Returns `true` when a new run was started.
    pub fn record(&mut self, frame: u64, value: T) -> bool {
        *self.distribution.entry(value).or_insert(0) += 1;
        self.observed += 1;

        match self.runs.last_mut() {
            Some(run) if run.value == value => {
                run.frames += 1;
                false
            }
            _ => {
                self.runs.push(Run {
                    start_frame: frame,
                    value,
                    frames: 1,
                });
                true
            }
        }
    }

    /// Value in effect at `frame`: the run starting at or before it with no later run
    /// starting at or before it.
    pub fn value_at(&self, frame: u64) -> Result<T, StatsError> {
        let idx = self.runs.partition_point(|run| run.start_frame <= frame);
        if idx == 0 {
            return Err(StatsError::NotFound { frame });
        }
        Ok(self.runs[idx - 1].value)
    }

    /// Number of observations that carried `value`, regardless of run boundaries.
    pub fn frames_with(&self, value: &T) -> u64 {
        self.distribution.get(value).copied().unwrap_or(0)
    }

    pub fn current(&self) -> Option<T> {
        self.runs.last().map(|run| run.value)
    }

    pub fn runs(&self) -> &[Run<T>] {
        &self.runs
    }

    /// Value counts in first-seen order.
    pub fn distribution(&self) -> &IndexMap<T, u64> {
        &self.distribution
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn change_points(&self) -> usize {
        self.runs.len().saturating_sub(1)
    }

    pub(crate) fn run_length_total(&self) -> u64 {
        self.runs.iter().map(|run| run.frames).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters() -> Timeline<char> {
        let mut timeline = Timeline::new();
        timeline.record(0, 'A');
        timeline.record(4, 'A');
        timeline.record(10, 'B');
        timeline.record(18, 'B');
        timeline.record(25, 'C');
        timeline
    }

    #[test]
    fn value_at_frame_scans_runs() {
        let timeline = letters();
        let starts: Vec<(u64, char)> = timeline
            .runs()
            .iter()
            .map(|run| (run.start_frame, run.value))
            .collect();
        assert_eq!(starts, vec![(0, 'A'), (10, 'B'), (25, 'C')]);

        assert_eq!(timeline.value_at(15), Ok('B'));
        assert_eq!(timeline.value_at(3), Ok('A'));
        assert_eq!(timeline.value_at(10), Ok('B'));
        assert_eq!(timeline.value_at(1_000), Ok('C'));
    }

    #[test]
    fn value_before_first_run_is_not_found() {
        let mut timeline = Timeline::new();
        timeline.record(5, 'A');
        assert_eq!(timeline.value_at(4), Err(StatsError::NotFound { frame: 4 }));
        assert_eq!(
            Timeline::<char>::new().value_at(0),
            Err(StatsError::NotFound { frame: 0 })
        );
    }

    #[test]
    fn distribution_counts_frames_not_runs() {
        let mut timeline = letters();
        timeline.record(30, 'A');
        assert_eq!(timeline.frames_with(&'A'), 3);
        assert_eq!(timeline.frames_with(&'B'), 2);
        assert_eq!(timeline.frames_with(&'Z'), 0);
        assert_eq!(timeline.runs().len(), 4);
        assert_eq!(timeline.change_points(), 3);
    }

    #[test]
    fn run_lengths_sum_to_observations() {
        let mut timeline = Timeline::new();
        for (frame, value) in [3, 3, 1, 1, 1, 3, 2, 2].into_iter().enumerate() {
            timeline.record(frame as u64, value);
            assert_eq!(timeline.run_length_total(), timeline.observed());
            assert_eq!(timeline.current(), Some(value));
        }
        let alternating = timeline
            .runs()
            .windows(2)
            .all(|pair| pair[0].value != pair[1].value);
        assert!(alternating);
    }
}
