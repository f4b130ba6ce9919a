//! State shared between a worker thread and status readers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::camera::CameraId;
use crate::detect::ClassificationResult;
use crate::frame::FrameWindow;

use super::alert::AlertPhase;

/// Window and verdict, guarded by the worker's single mutex.
#[derive(Debug)]
pub(crate) struct DetectionState {
    pub window: FrameWindow,
    pub last_result: Option<ClassificationResult>,
    pub phase: AlertPhase,
    pub recording_alert: bool,
}

impl DetectionState {
    pub(crate) fn new(window: FrameWindow) -> Self {
        Self {
            window,
            last_result: None,
            phase: AlertPhase::Idle,
            recording_alert: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub frames_read: AtomicU64,
    pub read_failures: AtomicU64,
    pub windows_classified: AtomicU64,
    pub classify_failures: AtomicU64,
    pub alerts_triggered: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub clips_written: AtomicU64,
    pub source_healthy: AtomicBool,
}

impl WorkerCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            classify_failures: self.classify_failures.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            clips_written: self.clips_written.load(Ordering::Relaxed),
        }
    }
}

/// Worker counters at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_read: u64,
    pub read_failures: u64,
    pub windows_classified: u64,
    pub classify_failures: u64,
    pub alerts_triggered: u64,
    pub alerts_suppressed: u64,
    pub clips_written: u64,
}

/// Status snapshot for one camera.
#[derive(Clone, Debug)]
pub struct WorkerStatus {
    pub camera_id: CameraId,
    pub last_result: Option<ClassificationResult>,
    pub window_len: usize,
    pub phase: AlertPhase,
    pub recording_alert: bool,
    pub source_healthy: bool,
    pub stats: WorkerStats,
}
