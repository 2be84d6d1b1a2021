use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::common::SourceId;
use crate::config::{BackpressureMode, Configuration};
use crate::error::{AppError, ConfigError};
use crate::extract::{ClassifierSet, CropWriter, FrameExtractor, RawFrameExport, WorkerPool};
use crate::intake::{
    BackpressurePolicy, FrameReader, FrameSource, SourceSettings, SourceSummary, frame_queue,
    open_reader,
};
use crate::pipeline::{EntityReport, EntityRouter, EntitySettings, MetricsSnapshot, PipelineMetrics};
use crate::sink::{EventStore, Sink};

/// How one capture source ended.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: SourceId,
    pub summary: Option<SourceSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub frames_processed: u64,
    pub metrics: MetricsSnapshot,
    pub sources: Vec<SourceOutcome>,
    pub entities: Vec<EntityReport>,
}

pub struct Coordinator {
    run_id: Uuid,
    configuration: Configuration,
    sources: Vec<(SourceId, Box<dyn FrameReader>)>,
    classifiers: ClassifierSet,
    sinks: Vec<Arc<dyn Sink>>,
    store: Option<Arc<dyn EventStore>>,
    metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
}

impl Coordinator {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Token that stops the whole pipeline when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Runs until every source is exhausted and the queue is drained, or until the
    /// pipeline is cancelled, then drains the entity actors.
    pub async fn run(self) -> Result<PipelineReport, AppError> {
        let started_at = Utc::now();
        let configuration = self.configuration;
        let metrics = self.metrics;
        let cancel_token = self.cancel_token;
        info!(
            "Starting run {} with {} sources and {} workers",
            self.run_id,
            self.sources.len(),
            configuration.extraction.workers
        );

        let (producer, consumer) = frame_queue(
            configuration.queue.capacity,
            BackpressurePolicy::from_config(&configuration.queue),
            metrics.clone(),
        );
        let router = Arc::new(EntityRouter::new(
            EntitySettings::from_config(&configuration),
            self.sinks,
            self.store,
            metrics.clone(),
        ));
        let raw_export = configuration
            .extraction
            .raw_export_path
            .as_deref()
            .map(RawFrameExport::open)
            .transpose()?;
        let extractor = Arc::new(
            FrameExtractor::new(
                self.classifiers,
                configuration.extraction.enabled.clone(),
                metrics.clone(),
            )
            .with_crop_writer(configuration.extraction.crop_output_dir.as_ref().map(CropWriter::new))
            .with_raw_export(raw_export),
        );
        let pool = WorkerPool::spawn(
            configuration.extraction.workers,
            consumer,
            extractor,
            router.clone(),
            configuration.queue.poll_interval(),
            metrics.clone(),
            cancel_token.clone(),
        );

        let settings = SourceSettings::from_config(&configuration.capture);
        let halt_on_fault = configuration.capture.halt_on_fault;
        let mut source_tasks = Vec::with_capacity(self.sources.len());
        for (id, reader) in self.sources {
            let source = FrameSource::spawn(
                id,
                reader,
                producer.clone(),
                settings,
                metrics.clone(),
                cancel_token.child_token(),
            )
            .inspect_err(|_| cancel_token.cancel())?;
            let pipeline_token = cancel_token.clone();
            source_tasks.push(tokio::task::spawn_blocking(move || {
                let result = source.join();
                if result.is_err() && halt_on_fault {
                    error!("Source {id} faulted, stopping the pipeline");
                    pipeline_token.cancel();
                }
                (id, result)
            }));
        }
        // the queue closes once the last source lets go of its producer
        drop(producer);

        let mut sources = Vec::with_capacity(source_tasks.len());
        for joined in join_all(source_tasks).await {
            let (source, result) = joined?;
            sources.push(match result {
                Ok(summary) => SourceOutcome {
                    source,
                    summary: Some(summary),
                    error: None,
                },
                Err(e) => SourceOutcome {
                    source,
                    summary: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let frames_processed = pool.join().await?;
        let entities = router.close().await?;
        let report = PipelineReport {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            frames_processed,
            metrics: metrics.snapshot(),
            sources,
            entities,
        };
        info!(
            "Run {} finished: {} frames processed, {} events published",
            report.run_id, report.frames_processed, report.metrics.events_published
        );
        Ok(report)
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
    sources: Vec<(SourceId, Box<dyn FrameReader>)>,
    classifiers: Option<ClassifierSet>,
    sinks: Vec<Arc<dyn Sink>>,
    store: Option<Arc<dyn EventStore>>,
    cancel_token: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            sources: Vec::new(),
            classifiers: None,
            sinks: Vec::new(),
            store: None,
            cancel_token: None,
        }
    }

    // Overrides correction.window_size from the configuration.
    pub fn window_size(mut self, window_size: usize) -> Self {
        self.configuration.correction.window_size = window_size;
        self
    }

    // Overrides queue.capacity from the configuration.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.configuration.queue.capacity = capacity;
        self
    }

    pub fn backpressure(mut self, mode: BackpressureMode) -> Self {
        self.configuration.queue.backpressure = mode;
        self
    }

    // Overrides extraction.workers from the configuration.
    pub fn workers(mut self, workers: usize) -> Self {
        self.configuration.extraction.workers = workers;
        self
    }

    pub fn frame_skip(mut self, frame_skip: u32) -> Self {
        self.configuration.capture.frame_skip = frame_skip;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.configuration.capture.width = width;
        self.configuration.capture.height = height;
        self
    }

    pub fn halt_on_fault(mut self, halt_on_fault: bool) -> Self {
        self.configuration.capture.halt_on_fault = halt_on_fault;
        self
    }

    pub fn source(mut self, id: SourceId, reader: Box<dyn FrameReader>) -> Self {
        self.sources.push((id, reader));
        self
    }

    /// Adds a reader for every source listed in the configuration.
    pub fn configured_sources(mut self) -> Self {
        let readers: Vec<_> = self
            .configuration
            .capture
            .sources
            .iter()
            .map(|spec| (spec.id, open_reader(spec)))
            .collect();
        self.sources.extend(readers);
        self
    }

    pub fn classifiers(mut self, classifiers: ClassifierSet) -> Self {
        self.classifiers = Some(classifiers);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn build(self) -> Result<Coordinator, AppError> {
        self.configuration.validate()?;
        let classifiers = self
            .classifiers
            .ok_or(AppError::Pipeline("Classifiers not set".to_string()))?;

        let mut ids: Vec<SourceId> = self.sources.iter().map(|(id, _)| *id).collect();
        ids.sort();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!("source {} registered twice", pair[0])).into());
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no frame sources registered".to_string()).into());
        }

        Ok(Coordinator {
            run_id: Uuid::new_v4(),
            configuration: self.configuration,
            sources: self.sources,
            classifiers,
            sinks: self.sinks,
            store: self.store,
            metrics: Arc::new(PipelineMetrics::new()),
            cancel_token: self.cancel_token.unwrap_or_else(CancellationToken::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::extract::SimulatedClassifier;
    use crate::intake::SyntheticReader;
    use crate::sink::{BroadcastSink, MemoryStore};
    use std::time::Duration;

    struct UnplugDevice;

    impl FrameReader for UnplugDevice {
        fn open(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::Open {
                source_id: SourceId(1),
                target: "/dev/video1".into(),
                reason: "device unplugged".into(),
            })
        }

        fn read(&mut self) -> Result<Option<image::DynamicImage>, CaptureError> {
            Ok(None)
        }

        fn describe(&self) -> String {
            "unplugged".into()
        }
    }

    fn synthetic(id: u32, frames: u64) -> Box<dyn FrameReader> {
        Box::new(SyntheticReader::new(SourceId(id), frames).with_size(640, 360))
    }

    #[test]
    fn build_requires_classifiers_and_sources() {
        let missing_classifiers = CoordinatorBuilder::new(Configuration::default())
            .source(SourceId(0), synthetic(0, 1))
            .build();
        assert!(matches!(missing_classifiers, Err(AppError::Pipeline(_))));

        let no_sources = CoordinatorBuilder::new(Configuration::default())
            .classifiers(SimulatedClassifier::full_set(0.0))
            .build();
        assert!(matches!(
            no_sources,
            Err(AppError::Config(ConfigError::Invalid(msg))) if msg.contains("no frame sources")
        ));

        let duplicate = CoordinatorBuilder::new(Configuration::default())
            .classifiers(SimulatedClassifier::full_set(0.0))
            .source(SourceId(0), synthetic(0, 1))
            .source(SourceId(0), synthetic(0, 1))
            .build();
        assert!(matches!(duplicate, Err(AppError::Config(_))));

        let invalid = CoordinatorBuilder::new(Configuration::default())
            .window_size(0)
            .classifiers(SimulatedClassifier::full_set(0.0))
            .source(SourceId(0), synthetic(0, 1))
            .build();
        assert!(matches!(invalid, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn faulty_source_is_isolated_by_default() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = CoordinatorBuilder::new(Configuration::default())
            .queue_capacity(64)
            .classifiers(SimulatedClassifier::full_set(0.0))
            .source(SourceId(0), synthetic(0, 12))
            .source(SourceId(1), Box::new(UnplugDevice))
            .sink(Arc::new(BroadcastSink::new(8)))
            .store(store.clone())
            .build()
            .unwrap();

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.metrics.capture_faults, 1);
        assert_eq!(report.frames_processed, 12);
        assert_eq!(report.entities.len(), 2);
        assert!(report.sources.iter().any(|s| s.source == SourceId(1) && s.error.is_some()));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn halt_on_fault_stops_every_source() {
        let coordinator = CoordinatorBuilder::new(Configuration::default())
            .halt_on_fault(true)
            .classifiers(SimulatedClassifier::full_set(0.0))
            .source(SourceId(0), synthetic(0, u64::MAX))
            .source(SourceId(1), Box::new(UnplugDevice))
            .build()
            .unwrap();
        let token = coordinator.cancel_token();

        let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .expect("pipeline did not stop")
            .unwrap();
        assert!(token.is_cancelled());
        assert_eq!(report.metrics.capture_faults, 1);
    }

    #[tokio::test]
    async fn stop_signal_ends_an_endless_run() {
        let coordinator = CoordinatorBuilder::new(Configuration::default())
            .classifiers(SimulatedClassifier::full_set(0.1))
            .source(SourceId(0), synthetic(0, u64::MAX))
            .build()
            .unwrap();
        let token = coordinator.cancel_token();
        let run = tokio::spawn(coordinator.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        let report = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("pipeline did not stop")
            .unwrap()
            .unwrap();
        assert!(report.metrics.frames_captured > 0);
        assert_eq!(report.sources.len(), 1);
    }
}
