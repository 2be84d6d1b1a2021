use chrono::Utc;
use image::imageops::FilterType;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::{Frame, SourceId};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::intake::queue::{FrameProducer, PushOutcome};
use crate::intake::reader::FrameReader;
use crate::pipeline::PipelineMetrics;

#[derive(Debug, Clone, Copy)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    pub frame_skip: u32,
    pub fps: Option<f64>,
}

impl SourceSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_skip: config.frame_skip,
            fps: config.fps,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        self.fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps))
    }
}

/// Per-source counters returned when a capture thread finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: SourceId,
    pub frames_read: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
}

/// A capture thread feeding one input into the frame queue.
pub struct FrameSource {
    id: SourceId,
    cancel_token: CancellationToken,
    capture_thread: Option<std::thread::JoinHandle<Result<SourceSummary, CaptureError>>>,
}

impl FrameSource {
    /// Starts capturing on a dedicated thread. `cancel_token` stops this source only; the
    /// source cancels it itself when it faults.
    pub fn spawn(
        id: SourceId,
        reader: Box<dyn FrameReader>,
        producer: FrameProducer,
        settings: SourceSettings,
        metrics: Arc<PipelineMetrics>,
        cancel_token: CancellationToken,
    ) -> Result<Self, CaptureError> {
        let capture = Capture {
            id,
            reader,
            producer,
            settings,
            metrics,
            cancel_token: cancel_token.clone(),
        };
        let capture_thread = std::thread::Builder::new()
            .name(format!("capture-{}", id.0))
            .spawn(move || capture.run())?;
        Ok(Self {
            id,
            cancel_token,
            capture_thread: Some(capture_thread),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Blocks until the capture thread exits.
    pub fn join(mut self) -> Result<SourceSummary, CaptureError> {
        match self.capture_thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(CaptureError::Read {
                    source_id: self.id,
                    reason: "capture thread panicked".to_string(),
                })
            }),
            None => Ok(SourceSummary {
                source: self.id,
                ..SourceSummary::default()
            }),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct Capture {
    id: SourceId,
    reader: Box<dyn FrameReader>,
    producer: FrameProducer,
    settings: SourceSettings,
    metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
}

impl Capture {
    fn run(mut self) -> Result<SourceSummary, CaptureError> {
        info!("Starting capture for {} ({})", self.id, self.reader.describe());
        if let Err(e) = self.reader.open() {
            return Err(self.fault(e));
        }

        let mut summary = SourceSummary {
            source: self.id,
            ..SourceSummary::default()
        };
        let keep_every = u64::from(self.settings.frame_skip) + 1;
        let frame_interval = self.settings.frame_interval();
        let mut sequence = 0u64;
        let mut window_start = Instant::now();
        let mut window_frames = 0u32;

        while !self.cancel_token.is_cancelled() {
            let image = match self.reader.read() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    info!("End of input reached for {}", self.id);
                    break;
                }
                Err(e) => return Err(self.fault(e)),
            };
            summary.frames_read += 1;
            self.metrics.record_captured();

            let frame_index = summary.frames_read;
            if frame_index % keep_every != 0 {
                continue;
            }

            let image = image.resize_exact(self.settings.width, self.settings.height, FilterType::Triangle);
            let frame = Frame::new(self.id, frame_index, sequence, image, Utc::now());
            match self.producer.offer(frame) {
                PushOutcome::Enqueued => {
                    sequence += 1;
                    summary.frames_enqueued += 1;
                    window_frames += 1;
                }
                PushOutcome::Dropped => summary.frames_dropped += 1,
                PushOutcome::Closed => {
                    info!("Frame queue closed, stopping capture for {}", self.id);
                    break;
                }
            }

            let elapsed = window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                info!(
                    "{}: actual FPS = {:.2}",
                    self.id,
                    f64::from(window_frames) / elapsed.as_secs_f64()
                );
                window_frames = 0;
                window_start = Instant::now();
            }

            if let Some(interval) = frame_interval {
                std::thread::sleep(interval);
            }
        }

        info!(
            "Capture for {} finished: {} read, {} enqueued, {} dropped",
            self.id, summary.frames_read, summary.frames_enqueued, summary.frames_dropped
        );
        Ok(summary)
    }

    fn fault(&self, e: CaptureError) -> CaptureError {
        error!("Capture fault on {}: {e}", self.id);
        self.metrics.record_capture_fault();
        self.cancel_token.cancel();
        e
    }
}
