use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::error::SinkError;
use crate::pipeline::observation::{CorrectedState, Readings};
use crate::sink::{EventRecord, EventStore, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published,
    Suppressed,
}

/// Forwards state changes for one entity, suppressing repeats of the last forwarded
/// readings. Each sink and the store remember what they last accepted, so a target that
/// failed is retried without repeating the change to targets that already took it.
pub struct SinkDispatcher {
    sinks: Arc<[Arc<dyn Sink>]>,
    store: Option<Arc<dyn EventStore>>,
    sink_timeout: Duration,
    // set only while every target holds these readings
    last_forwarded: Option<Readings>,
    accepted_by_sink: Vec<Option<Readings>>,
    accepted_by_store: Option<Readings>,
}

impl SinkDispatcher {
    pub fn new(
        sinks: Arc<[Arc<dyn Sink>]>,
        store: Option<Arc<dyn EventStore>>,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            accepted_by_sink: vec![None; sinks.len()],
            sinks,
            store,
            sink_timeout,
            last_forwarded: None,
            accepted_by_store: None,
        }
    }

    /// Treats `readings` as already forwarded to every target, e.g. after seeding from
    /// the store.
    pub fn prime(&mut self, readings: Readings) {
        self.last_forwarded = Some(readings);
        self.accepted_by_sink.fill(Some(readings));
        self.accepted_by_store = Some(readings);
    }

    pub fn last_forwarded(&self) -> Option<&Readings> {
        self.last_forwarded.as_ref()
    }

    /// Publishes `state` to every sink and writes it to the store unless it repeats the
    /// last forwarded readings. Targets that already accepted these readings are
    /// skipped. The first failure is returned after every pending target was tried.
    pub async fn dispatch(&mut self, state: &CorrectedState) -> Result<DispatchOutcome, SinkError> {
        let readings = state.readings;
        if self.last_forwarded == Some(readings) {
            return Ok(DispatchOutcome::Suppressed);
        }
        self.last_forwarded = None;

        let event = EventRecord::from(state);
        let pending: Vec<usize> = (0..self.sinks.len())
            .filter(|&i| self.accepted_by_sink[i] != Some(readings))
            .collect();
        let results = join_all(
            pending
                .iter()
                .map(|&i| self.publish_one(self.sinks[i].as_ref(), &event)),
        )
        .await;

        let mut first_error = None;
        for (i, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => self.accepted_by_sink[i] = Some(readings),
                Err(e) => {
                    debug!("{} rejected frame {}: {e}", self.sinks[i].name(), state.frame_index);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(store) = &self.store
            && self.accepted_by_store != Some(readings)
        {
            let write = store.write_event(state.race, state.frame_index, state.entity, state);
            let written = match timeout(self.sink_timeout, write).await {
                Ok(result) => result.map_err(SinkError::from),
                Err(_) => Err(SinkError::Timeout(store.name().to_string())),
            };
            match written {
                Ok(()) => self.accepted_by_store = Some(readings),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        debug!("Forwarded {} at frame {}", state.entity, state.frame_index);
        self.last_forwarded = Some(readings);
        Ok(DispatchOutcome::Published)
    }

    async fn publish_one(&self, sink: &dyn Sink, event: &EventRecord) -> Result<(), SinkError> {
        match timeout(self.sink_timeout, sink.publish(event)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(sink.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{EntityKey, PlayerSlot, RaceContext, SourceId};
    use crate::error::StoreError;
    use crate::sink::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<EventRecord>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<u64> {
            self.events.lock().unwrap().iter().map(|e| e.frame_index).collect()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, event: &EventRecord) -> Result<(), SinkError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SinkError::Publish {
                    entity: event.entity(),
                    reason: "bus unavailable".into(),
                });
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl EventStore for OfflineStore {
        fn name(&self) -> &str {
            "offline"
        }

        async fn write_event(
            &self,
            _race: RaceContext,
            _frame_index: u64,
            _entity: EntityKey,
            _state: &CorrectedState,
        ) -> Result<(), StoreError> {
            Err(StoreError::Task("database is locked".into()))
        }

        async fn get_previous_events(
            &self,
            _race: RaceContext,
            _entity: EntityKey,
            _limit: usize,
        ) -> Result<Vec<CorrectedState>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct StalledSink;

    #[async_trait]
    impl Sink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn publish(&self, _event: &EventRecord) -> Result<(), SinkError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn state(frame: u64, coins: u32) -> CorrectedState {
        CorrectedState {
            entity: EntityKey::new(SourceId(0), PlayerSlot::P1),
            frame_index: frame,
            race: RaceContext(0),
            readings: Readings {
                coins,
                ..Readings::default()
            },
        }
    }

    fn dispatcher(sink: Arc<RecordingSink>, store: Option<Arc<MemoryStore>>) -> SinkDispatcher {
        let sinks: Arc<[Arc<dyn Sink>]> = Arc::from(vec![sink as Arc<dyn Sink>]);
        SinkDispatcher::new(
            sinks,
            store.map(|s| s as Arc<dyn EventStore>),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn identical_states_are_published_once() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryStore::new());
        let mut dispatcher = dispatcher(sink.clone(), Some(store.clone()));

        assert_eq!(dispatcher.dispatch(&state(1, 3)).await.unwrap(), DispatchOutcome::Published);
        assert_eq!(dispatcher.dispatch(&state(2, 3)).await.unwrap(), DispatchOutcome::Suppressed);
        assert_eq!(dispatcher.dispatch(&state(3, 3)).await.unwrap(), DispatchOutcome::Suppressed);
        assert_eq!(sink.frames(), vec![1]);
        assert_eq!(store.len(), 1);

        assert_eq!(dispatcher.dispatch(&state(4, 4)).await.unwrap(), DispatchOutcome::Published);
        assert_eq!(sink.frames(), vec![1, 4]);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_on_next_state() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = dispatcher(sink.clone(), None);

        sink.failing.store(true, Ordering::SeqCst);
        assert!(dispatcher.dispatch(&state(1, 3)).await.is_err());
        assert!(dispatcher.last_forwarded().is_none());

        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(dispatcher.dispatch(&state(2, 3)).await.unwrap(), DispatchOutcome::Published);
        assert_eq!(sink.frames(), vec![2]);
    }

    fn two_sinks(healthy: &Arc<RecordingSink>, flaky: &Arc<RecordingSink>) -> SinkDispatcher {
        let sinks: Arc<[Arc<dyn Sink>]> = Arc::from(vec![
            healthy.clone() as Arc<dyn Sink>,
            flaky.clone() as Arc<dyn Sink>,
        ]);
        SinkDispatcher::new(sinks, None, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn failing_sink_does_not_repeat_change_to_healthy_sink() {
        let healthy = Arc::new(RecordingSink::default());
        let flaky = Arc::new(RecordingSink::default());
        flaky.failing.store(true, Ordering::SeqCst);
        let mut dispatcher = two_sinks(&healthy, &flaky);

        for frame in 1..=3 {
            assert!(dispatcher.dispatch(&state(frame, 3)).await.is_err());
        }
        assert_eq!(healthy.frames(), vec![1]);

        flaky.failing.store(false, Ordering::SeqCst);
        assert_eq!(dispatcher.dispatch(&state(4, 3)).await.unwrap(), DispatchOutcome::Published);
        assert_eq!(dispatcher.dispatch(&state(5, 3)).await.unwrap(), DispatchOutcome::Suppressed);
        assert_eq!(healthy.frames(), vec![1]);
        assert_eq!(flaky.frames(), vec![4]);
    }

    #[tokio::test]
    async fn reverting_change_reaches_sink_that_saw_the_change() {
        let healthy = Arc::new(RecordingSink::default());
        let flaky = Arc::new(RecordingSink::default());
        let mut dispatcher = two_sinks(&healthy, &flaky);

        dispatcher.dispatch(&state(1, 3)).await.unwrap();
        flaky.failing.store(true, Ordering::SeqCst);
        assert!(dispatcher.dispatch(&state(2, 4)).await.is_err());
        flaky.failing.store(false, Ordering::SeqCst);

        // back to the readings the flaky sink already holds
        assert_eq!(dispatcher.dispatch(&state(3, 3)).await.unwrap(), DispatchOutcome::Published);
        assert_eq!(healthy.frames(), vec![1, 2, 3]);
        assert_eq!(flaky.frames(), vec![1]);
    }

    #[tokio::test]
    async fn store_failure_does_not_repeat_publishes() {
        let sink = Arc::new(RecordingSink::default());
        let sinks: Arc<[Arc<dyn Sink>]> = Arc::from(vec![sink.clone() as Arc<dyn Sink>]);
        let mut dispatcher = SinkDispatcher::new(
            sinks,
            Some(Arc::new(OfflineStore) as Arc<dyn EventStore>),
            Duration::from_millis(200),
        );

        for frame in 1..=3 {
            let result = dispatcher.dispatch(&state(frame, 6)).await;
            assert!(matches!(result, Err(SinkError::Store(StoreError::Task(_)))));
        }
        assert_eq!(sink.frames(), vec![1]);
        assert!(dispatcher.last_forwarded().is_none());
    }

    #[tokio::test]
    async fn primed_memo_suppresses_seeded_state() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = dispatcher(sink.clone(), None);
        dispatcher.prime(state(0, 5).readings);
        assert_eq!(dispatcher.dispatch(&state(1, 5)).await.unwrap(), DispatchOutcome::Suppressed);
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn stalled_sink_times_out() {
        let sinks: Arc<[Arc<dyn Sink>]> = Arc::from(vec![Arc::new(StalledSink) as Arc<dyn Sink>]);
        let mut dispatcher = SinkDispatcher::new(sinks, None, Duration::from_millis(20));
        let result = dispatcher.dispatch(&state(1, 1)).await;
        assert!(matches!(result, Err(SinkError::Timeout(name)) if name == "stalled"));
        assert!(dispatcher.last_forwarded().is_none());
    }
}
