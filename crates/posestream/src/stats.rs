//! Per-session pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated from the camera, analyzer and result threads.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_replaced: AtomicU64,
    frames_submitted: AtomicU64,
    frames_skipped: AtomicU64,
    results_delivered: AtomicU64,
    empty_results: AtomicU64,
    failed_detections: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames offered by the camera
    pub frames_received: u64,
    /// Frames discarded because a newer one arrived first
    pub frames_replaced: u64,
    /// Frames handed to the engine for detection
    pub frames_submitted: u64,
    /// Frames dropped by the analyzer (engine not ready, conversion error)
    pub frames_skipped: u64,
    /// Landmark sequences dispatched to the host
    pub results_delivered: u64,
    /// Delivered sequences with no subject
    pub empty_results: u64,
    /// Completions that carried an inference error
    pub failed_detections: u64,
}

impl PipelineStats {
    pub(crate) fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replaced(&self) {
        self.frames_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, empty: bool) {
        self.results_delivered.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failed(&self) {
        self.failed_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_replaced: self.frames_replaced.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            empty_results: self.empty_results.load(Ordering::Relaxed),
            failed_detections: self.failed_detections.load(Ordering::Relaxed),
        }
    }
}
