pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod intake;
pub mod pipeline;
pub mod sink;

pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder, PipelineReport};
pub use error::{AppError, CaptureError, ClassifierError, ConfigError, SinkError, StatsError, StoreError};
