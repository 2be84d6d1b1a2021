use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::SourceId;
use crate::common::race::DEFAULT_RACE_FRAME_SPAN;
use crate::error::ConfigError;
use crate::pipeline::StatKind;

const ENV_PREFIX: &str = "LAPWATCH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub queue: QueueConfig,
    pub capture: CaptureConfig,
    pub extraction: ExtractionConfig,
    pub correction: CorrectionConfig,
    pub dispatch: DispatchConfig,
    pub log_level: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            capture: CaptureConfig::default(),
            extraction: ExtractionConfig::default(),
            correction: CorrectionConfig::default(),
            dispatch: DispatchConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Drop the newest frame and keep going.
    Drop,
    /// Drop the newest frame and pause the producer with exponential backoff.
    Backoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub backpressure: BackpressureMode,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long a worker waits for a frame before re-checking the stop signal.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            backpressure: BackpressureMode::Drop,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Synthetic { frames: u64 },
    ImageDir { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: SourceId,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Number of frames discarded after every kept frame.
    pub frame_skip: u32,
    /// Pace replayed input to this rate. Live input is never paced.
    pub fps: Option<f64>,
    /// Stop the whole pipeline when any source faults.
    pub halt_on_fault: bool,
    pub sources: Vec<SourceSpec>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frame_skip: 0,
            fps: None,
            halt_on_fault: false,
            sources: vec![
                SourceSpec {
                    id: SourceId(0),
                    kind: SourceKind::Synthetic { frames: 300 },
                },
                SourceSpec {
                    id: SourceId(1),
                    kind: SourceKind::Synthetic { frames: 300 },
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub workers: usize,
    pub enabled: Vec<StatKind>,
    /// When set, every classified crop is written below this directory.
    pub crop_output_dir: Option<PathBuf>,
    /// When set, every frame's raw readings are appended to this CSV file.
    pub raw_export_path: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            enabled: StatKind::ALL.to_vec(),
            crop_output_dir: None,
            raw_export_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub window_size: usize,
    /// Warm each entity's window from the store before its first observation.
    pub seed_from_store: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            window_size: 9,
            seed_from_store: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mailbox_capacity: usize,
    pub sink_timeout_ms: u64,
    pub race_frame_span: u64,
    /// Operator-assigned race id; replaces the id derived from `race_frame_span`.
    pub race_id: Option<u64>,
    pub log_events: bool,
    /// Capacity of the in-process event bus; 0 disables it.
    pub broadcast_capacity: usize,
    pub json_lines_path: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            sink_timeout_ms: 2000,
            race_frame_span: DEFAULT_RACE_FRAME_SPAN,
            race_id: None,
            log_events: true,
            broadcast_capacity: 1024,
            json_lines_path: None,
            sqlite_path: None,
        }
    }
}

impl DispatchConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}

impl Configuration {
    /// Defaults, overlaid by the optional file, overlaid by `LAPWATCH_*` variables
    /// (`LAPWATCH_QUEUE__CAPACITY=50`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let configuration: Configuration = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.queue.capacity == 0 {
            return invalid("queue.capacity must be at least 1");
        }
        if self.queue.backpressure == BackpressureMode::Backoff
            && self.queue.initial_backoff_ms > self.queue.max_backoff_ms
        {
            return invalid("queue.initial_backoff_ms exceeds queue.max_backoff_ms");
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture resolution must be non-zero");
        }
        if let Some(fps) = self.capture.fps
            && !(fps.is_finite() && fps > 0.0)
        {
            return invalid("capture.fps must be a positive number");
        }
        let mut ids: Vec<SourceId> = self.capture.sources.iter().map(|s| s.id).collect();
        ids.sort();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return invalid("capture.sources contains duplicate ids");
        }
        if self.extraction.workers == 0 {
            return invalid("extraction.workers must be at least 1");
        }
        if self.correction.window_size == 0 {
            return invalid("correction.window_size must be at least 1");
        }
        if self.dispatch.mailbox_capacity == 0 {
            return invalid("dispatch.mailbox_capacity must be at least 1");
        }
        if self.dispatch.race_frame_span == 0 {
            return invalid("dispatch.race_frame_span must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let configuration = Configuration::default();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.correction.window_size, 9);
        assert_eq!(configuration.extraction.enabled.len(), 6);
        assert_eq!(configuration.capture.sources.len(), 2);
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut configuration = Configuration::default();
        configuration.correction.window_size = 0;
        assert!(matches!(configuration.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let mut configuration = Configuration::default();
        configuration.capture.sources[1].id = SourceId(0);
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[queue]
capacity = 8
backpressure = "backoff"

[correction]
window_size = 5

[dispatch]
race_id = 12

[extraction]
enabled = ["coins", "position"]

[[capture.sources]]
id = 7
kind = "image_dir"
path = "/tmp/frames"
"#
        )
        .unwrap();

        let configuration = Configuration::load(Some(file.path())).unwrap();
        assert_eq!(configuration.log_level, "debug");
        assert_eq!(configuration.queue.capacity, 8);
        assert_eq!(configuration.queue.backpressure, BackpressureMode::Backoff);
        assert_eq!(configuration.queue.poll_interval_ms, 1000);
        assert_eq!(configuration.correction.window_size, 5);
        assert_eq!(configuration.dispatch.race_id, Some(12));
        assert_eq!(configuration.dispatch.race_frame_span, DEFAULT_RACE_FRAME_SPAN);
        assert_eq!(
            configuration.extraction.enabled,
            vec![StatKind::Coins, StatKind::Position]
        );
        assert_eq!(configuration.capture.sources.len(), 1);
        assert_eq!(configuration.capture.sources[0].id, SourceId(7));
        assert!(matches!(
            configuration.capture.sources[0].kind,
            SourceKind::ImageDir { .. }
        ));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[extraction]\nworkers = 0").unwrap();
        assert!(matches!(
            Configuration::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }
}
