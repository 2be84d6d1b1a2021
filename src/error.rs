use thiserror::Error;

use crate::common::{EntityKey, SourceId};
use crate::pipeline::StatKind;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Capture Error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Sink Error: {0}")]
    Sink(#[from] SinkError),
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
    #[error("Pipeline Error: {0}")]
    Pipeline(String),
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("Failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Capture faults are fatal for the owning frame source only.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open source {source_id} ({target}): {reason}")]
    Open {
        source_id: SourceId,
        target: String,
        reason: String,
    },
    #[error("Failed to read frame from source {source_id}: {reason}")]
    Read { source_id: SourceId, reason: String },
    #[error("Frame source {0} was read before being opened")]
    NotOpened(SourceId),
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier failed: {0}")]
    Failed(String),
    #[error("Classifier for {kind} returned a {found} reading")]
    UnexpectedReading { kind: StatKind, found: &'static str },
    #[error("Classifier for {0} panicked")]
    Panicked(StatKind),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to publish event for {entity}: {reason}")]
    Publish { entity: EntityKey, reason: String },
    #[error("Sink '{0}' timed out")]
    Timeout(String),
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt stored event: {0}")]
    Corrupt(String),
    #[error("Store task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("No data recorded at or before frame {frame}")]
    NotFound { frame: u64 },
    #[error("{kind} does not hold {found} values")]
    KindMismatch { kind: StatKind, found: &'static str },
    #[error("Entity {0} is not tracked")]
    UnknownEntity(EntityKey),
    #[error("Entity {0} stopped before answering")]
    EntityStopped(EntityKey),
}
