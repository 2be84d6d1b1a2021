use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::common::Frame;
use crate::config::{BackpressureMode, QueueConfig};
use crate::pipeline::PipelineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Drop the newest frame when the queue is full.
    Drop,
    /// Drop the newest frame and pause the producer. The pause doubles while the queue
    /// stays full, up to `max`, and resets after the next successful push.
    Backoff { initial: Duration, max: Duration },
}

impl BackpressurePolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        match config.backpressure {
            BackpressureMode::Drop => BackpressurePolicy::Drop,
            BackpressureMode::Backoff => BackpressurePolicy::Backoff {
                initial: Duration::from_millis(config.initial_backoff_ms),
                max: Duration::from_millis(config.max_backoff_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    Dropped,
    /// Every consumer is gone; the producer should stop.
    Closed,
}

#[derive(Debug)]
pub enum RecvOutcome {
    Frame(Frame),
    Timeout,
    /// All producers are gone and the queue is drained.
    Closed,
}

/// Creates a bounded frame queue shared by every source and worker.
pub fn frame_queue(
    capacity: usize,
    policy: BackpressurePolicy,
    metrics: Arc<PipelineMetrics>,
) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameProducer {
            tx,
            policy,
            backoff: None,
            metrics,
        },
        FrameConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Non-blocking sending half, used from capture threads. Clones keep separate
/// backoff state.
#[derive(Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<Frame>,
    policy: BackpressurePolicy,
    backoff: Option<Duration>,
    metrics: Arc<PipelineMetrics>,
}

impl FrameProducer {
    pub fn offer(&mut self, frame: Frame) -> PushOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.backoff = None;
                self.metrics.record_enqueued();
                PushOutcome::Enqueued
            }
            Err(TrySendError::Full(frame)) => {
                self.metrics.record_dropped();
                warn!(
                    "Dropping frame {} of {}: queue full",
                    frame.frame_index(),
                    frame.source()
                );
                if let BackpressurePolicy::Backoff { initial, max } = self.policy {
                    let pause = self.backoff.map_or(initial, |last| (last * 2).min(max));
                    self.backoff = Some(pause);
                    std::thread::sleep(pause);
                }
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Pause applied after the last full condition, if the queue is still backing up.
    pub fn current_backoff(&self) -> Option<Duration> {
        self.backoff
    }
}

/// Receiving half shared by the worker pool.
#[derive(Clone)]
pub struct FrameConsumer {
    rx: Arc<Mutex<mpsc::Receiver<Frame>>>,
}

impl FrameConsumer {
    pub async fn recv_timeout(&self, wait: Duration) -> RecvOutcome {
        let next = async { self.rx.lock().await.recv().await };
        match tokio::time::timeout(wait, next).await {
            Ok(Some(frame)) => RecvOutcome::Frame(frame),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::Timeout,
        }
    }
}
