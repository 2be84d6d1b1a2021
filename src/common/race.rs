use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of frames grouped under one race context.
pub const DEFAULT_RACE_FRAME_SPAN: u64 = 6000;

/// Coarse grouping id for statistics and sink writes, derived from the frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaceContext(pub u64);

impl RaceContext {
    /// Increments once every `span` frames. A zero span is treated as one frame.
    pub fn from_frame(frame_index: u64, span: u64) -> Self {
        Self(frame_index / span.max(1))
    }
}

impl fmt::Display for RaceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "race{}", self.0)
    }
}
