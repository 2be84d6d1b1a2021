pub mod aggregator;
pub mod corrector;
pub mod dispatcher;
pub mod entity;
pub mod metrics;
pub mod observation;
pub mod sequencer;
pub mod timeline;

pub use aggregator::EntityStats;
pub use corrector::{HistoryWindow, SlidingWindowCorrector, majority};
pub use dispatcher::{DispatchOutcome, SinkDispatcher};
pub use entity::{EntityHandle, EntityReport, EntityRouter, EntitySettings};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use observation::{CorrectedState, FieldValue, RawObservation, Readings, StatKind};
pub use timeline::{Run, Timeline};
