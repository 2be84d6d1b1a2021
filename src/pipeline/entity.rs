use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::{EntityKey, RaceContext};
use crate::config::Configuration;
use crate::error::{AppError, StatsError};
use crate::pipeline::aggregator::EntityStats;
use crate::pipeline::corrector::SlidingWindowCorrector;
use crate::pipeline::dispatcher::{DispatchOutcome, SinkDispatcher};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::observation::{CorrectedState, FieldValue, RawObservation, StatKind};
use crate::pipeline::sequencer::{Admission, ReorderBuffer};
use crate::sink::{EventStore, Sink};

/// Per-entity tuning shared by every actor the router spawns.
#[derive(Debug, Clone)]
pub struct EntitySettings {
    pub window_size: usize,
    pub mailbox_capacity: usize,
    pub race_frame_span: u64,
    /// Fixed race id for every state, overriding the frame span.
    pub race_id: Option<u64>,
    pub seed_from_store: bool,
    pub sink_timeout: Duration,
}

impl EntitySettings {
    pub fn from_config(configuration: &Configuration) -> Self {
        Self {
            window_size: configuration.correction.window_size,
            mailbox_capacity: configuration.dispatch.mailbox_capacity,
            race_frame_span: configuration.dispatch.race_frame_span,
            race_id: configuration.dispatch.race_id,
            seed_from_store: configuration.correction.seed_from_store,
            sink_timeout: configuration.dispatch.sink_timeout(),
        }
    }

    pub fn race_for(&self, frame_index: u64) -> RaceContext {
        match self.race_id {
            Some(id) => RaceContext(id),
            None => RaceContext::from_frame(frame_index, self.race_frame_span),
        }
    }
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self::from_config(&Configuration::default())
    }
}

pub enum EntityCommand {
    Observe {
        sequence: u64,
        observation: RawObservation,
    },
    ValueAt {
        kind: StatKind,
        frame: u64,
        responder: oneshot::Sender<Result<FieldValue, StatsError>>,
    },
    FramesWith {
        kind: StatKind,
        value: FieldValue,
        responder: oneshot::Sender<Result<u64, StatsError>>,
    },
    Snapshot {
        responder: oneshot::Sender<EntityStats>,
    },
    Shutdown,
}

/// Final state of one entity, returned when the router closes.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity: EntityKey,
    pub published: u64,
    pub suppressed: u64,
    pub publish_failures: u64,
    pub stale_observations: u64,
    pub average_position: Option<f64>,
    pub average_coins: Option<f64>,
    pub last_state: Option<CorrectedState>,
    pub stats: EntityStats,
}

/// Single writer for everything one entity owns: ordering, correction, statistics and
/// the dedup memo.
struct EntityActor {
    entity: EntityKey,
    settings: EntitySettings,
    reorder: ReorderBuffer<RawObservation>,
    corrector: SlidingWindowCorrector,
    stats: EntityStats,
    dispatcher: SinkDispatcher,
    store: Option<Arc<dyn EventStore>>,
    metrics: Arc<PipelineMetrics>,
    seeded: bool,
    published: u64,
    suppressed: u64,
    publish_failures: u64,
    stale_observations: u64,
    last_state: Option<CorrectedState>,
}

impl EntityActor {
    fn new(
        entity: EntityKey,
        settings: EntitySettings,
        sinks: Arc<[Arc<dyn Sink>]>,
        store: Option<Arc<dyn EventStore>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            entity,
            reorder: ReorderBuffer::new(),
            corrector: SlidingWindowCorrector::new(entity, settings.window_size),
            stats: EntityStats::new(entity),
            dispatcher: SinkDispatcher::new(sinks, store.clone(), settings.sink_timeout),
            store,
            metrics,
            settings,
            seeded: false,
            published: 0,
            suppressed: 0,
            publish_failures: 0,
            stale_observations: 0,
            last_state: None,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<EntityCommand>) -> EntityReport {
        debug!("Entity actor for {} started", self.entity);
        while let Some(command) = mailbox.recv().await {
            match command {
                EntityCommand::Observe {
                    sequence,
                    observation,
                } => self.observe(sequence, observation).await,
                EntityCommand::ValueAt {
                    kind,
                    frame,
                    responder,
                } => {
                    let _ = responder.send(self.stats.value_at(kind, frame));
                }
                EntityCommand::FramesWith {
                    kind,
                    value,
                    responder,
                } => {
                    let _ = responder.send(self.stats.frames_with(kind, value));
                }
                EntityCommand::Snapshot { responder } => {
                    let _ = responder.send(self.stats.clone());
                }
                EntityCommand::Shutdown => break,
            }
        }

        let leftover = self.reorder.flush();
        if !leftover.is_empty() {
            warn!(
                "{}: releasing {} observations past missing sequences",
                self.entity,
                leftover.len()
            );
        }
        for observation in leftover {
            self.process(observation).await;
        }
        debug!("Entity actor for {} stopped", self.entity);
        self.into_report()
    }

    async fn observe(&mut self, sequence: u64, observation: RawObservation) {
        match self.reorder.accept(sequence, observation) {
            Admission::Released(ready) => {
                for observation in ready {
                    self.process(observation).await;
                }
            }
            Admission::Stale(sequence) => {
                self.stale_observations += 1;
                warn!("{}: discarding stale observation #{sequence}", self.entity);
            }
        }
    }

    async fn process(&mut self, observation: RawObservation) {
        if !self.seeded {
            self.seeded = true;
            self.seed(observation.frame_index).await;
        }

        let race = self.settings.race_for(observation.frame_index);
        let state = self.corrector.correct(&observation, race);
        self.metrics.record_corrected();
        self.stats.record(&state);

        match self.dispatcher.dispatch(&state).await {
            Ok(DispatchOutcome::Published) => {
                self.published += 1;
                self.metrics.record_published();
            }
            Ok(DispatchOutcome::Suppressed) => {
                self.suppressed += 1;
                self.metrics.record_suppressed();
            }
            Err(e) => {
                self.publish_failures += 1;
                self.metrics.record_publish_failure();
                error!("{}: failed to forward frame {}: {e}", self.entity, state.frame_index);
            }
        }
        self.last_state = Some(state);
    }

    async fn seed(&mut self, frame_index: u64) {
        if !self.settings.seed_from_store {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let race = self.settings.race_for(frame_index);
        match store
            .get_previous_events(race, self.entity, self.settings.window_size)
            .await
        {
            Ok(history) if !history.is_empty() => {
                info!("{}: seeded window with {} stored states", self.entity, history.len());
                if let Some(latest) = history.last() {
                    self.dispatcher.prime(latest.readings);
                }
                self.corrector.seed(history.into_iter().map(|s| s.readings));
            }
            Ok(_) => {}
            Err(e) => warn!("{}: could not seed from store: {e}", self.entity),
        }
    }

    fn into_report(self) -> EntityReport {
        EntityReport {
            entity: self.entity,
            published: self.published,
            suppressed: self.suppressed,
            publish_failures: self.publish_failures,
            stale_observations: self.stale_observations,
            average_position: self.stats.average_position(),
            average_coins: self.stats.average_coins(),
            last_state: self.last_state,
            stats: self.stats,
        }
    }
}

/// Query surface of one running entity actor.
#[derive(Clone)]
pub struct EntityHandle {
    entity: EntityKey,
    mailbox: mpsc::Sender<EntityCommand>,
}

impl EntityHandle {
    pub fn entity(&self) -> EntityKey {
        self.entity
    }

    async fn ask<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EntityCommand,
    ) -> Result<T, StatsError> {
        let (responder, response) = oneshot::channel();
        self.mailbox
            .send(command(responder))
            .await
            .map_err(|_| StatsError::EntityStopped(self.entity))?;
        response
            .await
            .map_err(|_| StatsError::EntityStopped(self.entity))
    }

    pub async fn value_at(&self, kind: StatKind, frame: u64) -> Result<FieldValue, StatsError> {
        self.ask(|responder| EntityCommand::ValueAt {
            kind,
            frame,
            responder,
        })
        .await?
    }

    pub async fn frames_with(&self, kind: StatKind, value: FieldValue) -> Result<u64, StatsError> {
        self.ask(|responder| EntityCommand::FramesWith {
            kind,
            value,
            responder,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<EntityStats, StatsError> {
        self.ask(|responder| EntityCommand::Snapshot { responder })
            .await
    }
}

struct EntityEntry {
    mailbox: mpsc::Sender<EntityCommand>,
    task: JoinHandle<EntityReport>,
}

/// Routes observations to per-entity actors, spawning each actor on first use.
pub struct EntityRouter {
    entries: Mutex<HashMap<EntityKey, EntityEntry>>,
    settings: EntitySettings,
    sinks: Arc<[Arc<dyn Sink>]>,
    store: Option<Arc<dyn EventStore>>,
    metrics: Arc<PipelineMetrics>,
}

impl EntityRouter {
    pub fn new(
        settings: EntitySettings,
        sinks: Vec<Arc<dyn Sink>>,
        store: Option<Arc<dyn EventStore>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            settings,
            sinks: Arc::from(sinks),
            store,
            metrics,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKey, EntityEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mailbox_for(&self, entity: EntityKey) -> mpsc::Sender<EntityCommand> {
        let mut entries = self.lock();
        let entry = entries.entry(entity).or_insert_with(|| {
            info!("Tracking new entity {entity}");
            let (tx, rx) = mpsc::channel(self.settings.mailbox_capacity.max(1));
            let actor = EntityActor::new(
                entity,
                self.settings.clone(),
                self.sinks.clone(),
                self.store.clone(),
                self.metrics.clone(),
            );
            EntityEntry {
                mailbox: tx,
                task: tokio::spawn(actor.run(rx)),
            }
        });
        entry.mailbox.clone()
    }

    /// Hands `observation` to its entity's actor. Waits while the mailbox is full.
    pub async fn submit(&self, sequence: u64, observation: RawObservation) -> Result<(), StatsError> {
        let entity = observation.entity;
        self.mailbox_for(entity)
            .send(EntityCommand::Observe {
                sequence,
                observation,
            })
            .await
            .map_err(|_| StatsError::EntityStopped(entity))
    }

    pub fn handle(&self, entity: EntityKey) -> Result<EntityHandle, StatsError> {
        self.lock()
            .get(&entity)
            .map(|entry| EntityHandle {
                entity,
                mailbox: entry.mailbox.clone(),
            })
            .ok_or(StatsError::UnknownEntity(entity))
    }

    pub fn entities(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Stops every actor after it has drained its mailbox and returns their reports,
    /// ordered by entity.
    pub async fn close(&self) -> Result<Vec<EntityReport>, AppError> {
        let drained: Vec<(EntityKey, EntityEntry)> = self.lock().drain().collect();
        let mut reports = Vec::with_capacity(drained.len());
        for (entity, entry) in drained {
            if entry.mailbox.send(EntityCommand::Shutdown).await.is_err() {
                warn!("Entity actor for {entity} exited early");
            }
            drop(entry.mailbox);
            reports.push(entry.task.await?);
        }
        reports.sort_by_key(|report| report.entity);
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ItemCode, PlayerSlot, SourceId};
    use crate::error::SinkError;
    use crate::pipeline::observation::Readings;
    use crate::sink::{BroadcastSink, EventRecord, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct FlakySink {
        down: AtomicBool,
        delivered: AtomicU64,
    }

    #[async_trait]
    impl Sink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn publish(&self, event: &EventRecord) -> Result<(), SinkError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SinkError::Publish {
                    entity: event.entity(),
                    reason: "connection refused".into(),
                });
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn p1() -> EntityKey {
        EntityKey::new(SourceId(0), PlayerSlot::P1)
    }

    fn coins(entity: EntityKey, frame: u64, coins: u32) -> RawObservation {
        RawObservation {
            entity,
            frame_index: frame,
            position: Some(3),
            item_slot_1: Some(ItemCode::None),
            item_slot_2: Some(ItemCode::None),
            coins: Some(coins),
            lap_num: Some(1),
            race_laps: Some(3),
        }
    }

    fn router(
        settings: EntitySettings,
        bus: Arc<BroadcastSink>,
        store: Option<Arc<MemoryStore>>,
    ) -> EntityRouter {
        EntityRouter::new(
            settings,
            vec![bus as Arc<dyn Sink>],
            store.map(|s| s as Arc<dyn EventStore>),
            Arc::new(PipelineMetrics::new()),
        )
    }

    fn settings(window_size: usize) -> EntitySettings {
        EntitySettings {
            window_size,
            ..EntitySettings::default()
        }
    }

    #[tokio::test]
    async fn out_of_order_submissions_are_processed_in_sequence() {
        let bus = Arc::new(BroadcastSink::new(16));
        let mut events = bus.subscribe();
        let router = router(settings(1), bus, None);

        // sequence 0 is delivered last, as a slow worker would
        router.submit(2, coins(p1(), 3, 7)).await.unwrap();
        router.submit(1, coins(p1(), 2, 6)).await.unwrap();
        router.submit(0, coins(p1(), 1, 5)).await.unwrap();

        let handle = router.handle(p1()).unwrap();
        assert_eq!(handle.value_at(StatKind::Coins, 1).await, Ok(FieldValue::Number(5)));
        assert_eq!(handle.value_at(StatKind::Coins, 2).await, Ok(FieldValue::Number(6)));
        assert_eq!(
            handle.value_at(StatKind::Coins, 0).await,
            Err(StatsError::NotFound { frame: 0 })
        );

        let frames: Vec<u64> = (0..3).map(|_| events.try_recv().unwrap().frame_index).collect();
        assert_eq!(frames, vec![1, 2, 3]);
        drop(handle);

        let reports = router.close().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].published, 3);
        assert_eq!(reports[0].stats.total_frames, 3);
    }

    #[tokio::test]
    async fn unchanged_states_are_suppressed_and_counted() {
        let bus = Arc::new(BroadcastSink::new(16));
        let router = router(settings(3), bus, None);
        for (seq, frame) in (0..5u64).zip(10..) {
            router.submit(seq, coins(p1(), frame, 4)).await.unwrap();
        }
        let reports = router.close().await.unwrap();
        let report = &reports[0];
        assert_eq!(report.published, 1);
        assert_eq!(report.suppressed, 4);
        assert_eq!(report.stats.coins.frames_with(&4), 5);
        assert_eq!(report.last_state.map(|s| s.frame_index), Some(14));
    }

    #[tokio::test]
    async fn entities_are_isolated() {
        let bus = Arc::new(BroadcastSink::new(16));
        let router = router(settings(3), bus, None);
        let p2 = EntityKey::new(SourceId(0), PlayerSlot::P2);

        router.submit(0, coins(p1(), 1, 1)).await.unwrap();
        router.submit(0, coins(p2, 1, 9)).await.unwrap();
        assert_eq!(router.entities(), vec![p1(), p2]);

        let stats = router.handle(p2).unwrap().snapshot().await.unwrap();
        assert_eq!(stats.coins.current(), Some(9));
        assert!(matches!(
            router.handle(EntityKey::new(SourceId(5), PlayerSlot::P1)),
            Err(StatsError::UnknownEntity(_))
        ));

        let handle = router.handle(p1()).unwrap();
        let reports = router.close().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            handle.value_at(StatKind::Coins, 1).await,
            Err(StatsError::EntityStopped(p1()))
        );
    }

    #[tokio::test]
    async fn duplicate_sequence_is_discarded() {
        let bus = Arc::new(BroadcastSink::new(16));
        let router = router(settings(3), bus, None);
        router.submit(0, coins(p1(), 1, 1)).await.unwrap();
        router.submit(0, coins(p1(), 1, 2)).await.unwrap();
        let reports = router.close().await.unwrap();
        assert_eq!(reports[0].stale_observations, 1);
        assert_eq!(reports[0].stats.total_frames, 1);
    }

    #[tokio::test]
    async fn close_flushes_observations_stuck_behind_a_gap() {
        let bus = Arc::new(BroadcastSink::new(16));
        let router = router(settings(1), bus, None);
        router.submit(1, coins(p1(), 2, 2)).await.unwrap();
        let reports = router.close().await.unwrap();
        assert_eq!(reports[0].stats.total_frames, 1);
        assert_eq!(reports[0].published, 1);
    }

    #[tokio::test]
    async fn sink_failures_are_counted_and_retried() {
        let sink = Arc::new(FlakySink::default());
        sink.down.store(true, Ordering::SeqCst);
        let metrics = Arc::new(PipelineMetrics::new());
        let router = EntityRouter::new(
            settings(1),
            vec![sink.clone() as Arc<dyn Sink>],
            None,
            metrics.clone(),
        );

        router.submit(0, coins(p1(), 1, 4)).await.unwrap();
        // a query is answered only after the observation ahead of it was handled
        router.handle(p1()).unwrap().snapshot().await.unwrap();
        assert_eq!(metrics.snapshot().publish_failures, 1);

        sink.down.store(false, Ordering::SeqCst);
        router.submit(1, coins(p1(), 2, 4)).await.unwrap();
        router.submit(2, coins(p1(), 3, 4)).await.unwrap();
        let reports = router.close().await.unwrap();
        let report = &reports[0];
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.suppressed, 1);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.events_published, 1);
        assert_eq!(snapshot.events_suppressed, 1);
    }

    #[tokio::test]
    async fn fixed_race_id_tags_every_state() {
        let store = Arc::new(MemoryStore::new());
        let settings = EntitySettings {
            race_id: Some(42),
            race_frame_span: 2,
            ..settings(1)
        };
        let router = router(settings, Arc::new(BroadcastSink::new(16)), Some(store.clone()));
        router.submit(0, coins(p1(), 1, 1)).await.unwrap();
        router.submit(1, coins(p1(), 7, 2)).await.unwrap();
        let reports = router.close().await.unwrap();

        assert_eq!(reports[0].last_state.map(|s| s.race), Some(RaceContext(42)));
        let history = store.get_previous_events(RaceContext(42), p1(), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(reports[0].average_coins, Some(1.5));
    }

    #[tokio::test]
    async fn cold_start_is_seeded_from_store() {
        let store = Arc::new(MemoryStore::new());
        let seeded = CorrectedState {
            entity: p1(),
            frame_index: 1,
            race: RaceContext(0),
            readings: Readings {
                position: 3,
                coins: 8,
                ..Readings::default()
            },
        };
        for frame in [1, 2] {
            store
                .write_event(RaceContext(0), frame, p1(), &CorrectedState { frame_index: frame, ..seeded })
                .await
                .unwrap();
        }

        let bus = Arc::new(BroadcastSink::new(16));
        let settings = EntitySettings {
            seed_from_store: true,
            ..settings(3)
        };
        let router = router(settings, bus, Some(store.clone()));
        // a single noisy reading is outvoted by the two stored states
        router.submit(0, coins(p1(), 3, 1)).await.unwrap();
        let reports = router.close().await.unwrap();
        let report = &reports[0];
        assert_eq!(report.last_state.map(|s| s.readings.coins), Some(8));
        assert_eq!(report.suppressed, 1);
        assert_eq!(store.len(), 2);
    }
}
