use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline-wide counters, shared by every stage through an `Arc`.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    frames_captured: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    classifier_failures: AtomicU64,
    capture_faults: AtomicU64,
    states_corrected: AtomicU64,
    events_published: AtomicU64,
    events_suppressed: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub classifier_failures: u64,
    pub capture_faults: u64,
    pub states_corrected: u64,
    pub events_published: u64,
    pub events_suppressed: u64,
    pub publish_failures: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_failure(&self) {
        self.classifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_fault(&self) {
        self.capture_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrected(&self) {
        self.states_corrected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.events_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
            capture_faults: self.capture_faults.load(Ordering::Relaxed),
            states_corrected: self.states_corrected.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}
