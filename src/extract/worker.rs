use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use image::DynamicImage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{EntityKey, Frame, PlayerSlot};
use crate::error::{AppError, ClassifierError};
use crate::extract::classifier::{Classifier, ClassifierSet};
use crate::extract::crops::CropWriter;
use crate::extract::export::RawFrameExport;
use crate::extract::regions::RegionLayout;
use crate::intake::{FrameConsumer, RecvOutcome};
use crate::pipeline::{EntityRouter, FieldValue, PipelineMetrics, RawObservation, StatKind};

/// Turns one frame into one raw observation per player slot.
pub struct FrameExtractor {
    layout: RegionLayout,
    classifiers: ClassifierSet,
    enabled: Vec<StatKind>,
    crop_writer: Option<CropWriter>,
    raw_export: Option<RawFrameExport>,
    metrics: Arc<PipelineMetrics>,
}

impl FrameExtractor {
    pub fn new(classifiers: ClassifierSet, enabled: Vec<StatKind>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            layout: RegionLayout::default(),
            classifiers,
            enabled,
            crop_writer: None,
            raw_export: None,
            metrics,
        }
    }

    pub fn with_layout(mut self, layout: RegionLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_crop_writer(mut self, crop_writer: Option<CropWriter>) -> Self {
        self.crop_writer = crop_writer;
        self
    }

    pub fn with_raw_export(mut self, raw_export: Option<RawFrameExport>) -> Self {
        self.raw_export = raw_export;
        self
    }

    /// Fields that are disabled or have no classifier stay absent. A classifier that
    /// errors, returns the wrong kind of value or panics also leaves its field absent.
    pub fn extract(&self, frame: &Frame) -> Vec<RawObservation> {
        let observations: Vec<RawObservation> = PlayerSlot::ALL
            .into_iter()
            .map(|slot| {
                let entity = EntityKey::new(frame.source(), slot);
                let mut observation = RawObservation::empty(entity, frame.frame_index());
                for &kind in &self.enabled {
                    let Some(classifier) = self.classifiers.get(kind) else {
                        continue;
                    };
                    match self.read_field(frame, slot, kind, classifier.as_ref()) {
                        Ok(value) => observation.set(kind, value),
                        Err(e) => {
                            self.metrics.record_classifier_failure();
                            debug!("{entity} frame {}: {e}", frame.frame_index());
                        }
                    }
                }
                observation
            })
            .collect();

        if let Some(export) = &self.raw_export
            && let Err(e) = export.append(frame, &observations)
        {
            warn!("Failed to export frame {} of {}: {e}", frame.frame_index(), frame.source());
        }
        observations
    }

    fn read_field(
        &self,
        frame: &Frame,
        slot: PlayerSlot,
        kind: StatKind,
        classifier: &dyn Classifier,
    ) -> Result<FieldValue, ClassifierError> {
        let crop = self
            .layout
            .region(slot, kind)
            .and_then(|region| region.crop(frame.image()))
            .ok_or_else(|| ClassifierError::Failed(format!("no {kind} region for {slot}")))?;

        if let Some(writer) = &self.crop_writer {
            self.save_crop(writer, frame, slot, kind, &crop);
        }

        let value = catch_unwind(AssertUnwindSafe(|| classifier.classify(&crop)))
            .map_err(|_| ClassifierError::Panicked(kind))??;
        kind.accept(value)
    }

    fn save_crop(&self, writer: &CropWriter, frame: &Frame, slot: PlayerSlot, kind: StatKind, crop: &DynamicImage) {
        if let Err(e) = writer.write(kind, slot, frame.source(), frame.frame_index(), crop) {
            warn!("Failed to save {kind} crop for {}/{slot}: {e}", frame.source());
        }
    }
}

/// Extraction workers sharing one frame queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<u64>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        consumer: FrameConsumer,
        extractor: Arc<FrameExtractor>,
        router: Arc<EntityRouter>,
        poll_interval: Duration,
        metrics: Arc<PipelineMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let workers = (0..count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    consumer: consumer.clone(),
                    extractor: extractor.clone(),
                    router: router.clone(),
                    poll_interval,
                    metrics: metrics.clone(),
                    cancel_token: cancel_token.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker and returns the number of frames they processed.
    pub async fn join(self) -> Result<u64, AppError> {
        let mut processed = 0;
        for result in futures::future::join_all(self.workers).await {
            processed += result?;
        }
        Ok(processed)
    }
}

struct Worker {
    id: usize,
    consumer: FrameConsumer,
    extractor: Arc<FrameExtractor>,
    router: Arc<EntityRouter>,
    poll_interval: Duration,
    metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
}

impl Worker {
    async fn run(self) -> u64 {
        debug!("Extraction worker {} started", self.id);
        let mut processed = 0;
        loop {
            // a frame taken off the queue is always finished before stopping
            let frame = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                outcome = self.consumer.recv_timeout(self.poll_interval) => match outcome {
                    RecvOutcome::Frame(frame) => frame,
                    RecvOutcome::Timeout => continue,
                    RecvOutcome::Closed => break,
                },
            };
            self.process(frame).await;
            processed += 1;
        }
        info!("Extraction worker {} finished after {processed} frames", self.id);
        processed
    }

    async fn process(&self, frame: Frame) {
        let sequence = frame.sequence();
        let source = frame.source();
        let frame_index = frame.frame_index();

        let extractor = self.extractor.clone();
        let observations = match tokio::task::spawn_blocking(move || extractor.extract(&frame)).await {
            Ok(observations) => observations,
            Err(e) => {
                error!("Extraction of frame {frame_index} from {source} failed: {e}");
                PlayerSlot::ALL
                    .into_iter()
                    .map(|slot| RawObservation::empty(EntityKey::new(source, slot), frame_index))
                    .collect()
            }
        };

        for observation in observations {
            let entity = observation.entity;
            if let Err(e) = self.router.submit(sequence, observation).await {
                warn!("Observation for {entity} at frame {frame_index} was not delivered: {e}");
            }
        }
        self.metrics.record_processed();
    }
}
