//! Detection persistence.
//!
//! An `EventSink` stores one record per triggered alert and later receives
//! the path of the consolidated clip. Both calls may be slow and may fail;
//! callers log failures and carry on.

mod sqlite;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::camera::CameraId;
use crate::detect::ClassLabel;

pub use sqlite::SqliteEventSink;

/// Identifier of a persisted detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DetectionId(pub i64);

pub trait EventSink: Send + Sync {
    /// Persist a detection and return its identifier.
    fn record_detection(
        &self,
        camera_id: CameraId,
        label: ClassLabel,
        zone: Option<&str>,
    ) -> Result<DetectionId>;

    /// Associate the consolidated clip with an earlier detection.
    fn attach_clip(&self, detection_id: DetectionId, clip_path: &Path) -> Result<()>;
}

/// A stored detection.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub id: DetectionId,
    pub camera_id: CameraId,
    pub label: ClassLabel,
    pub zone: Option<String>,
    pub created_at: u64,
    pub video_file: Option<PathBuf>,
}

/// In-process sink for tests and demos.
#[derive(Default)]
pub struct InMemoryEventSink {
    records: Mutex<Vec<DetectionRecord>>,
    fail_records: AtomicBool,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `record_detection` calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail_records.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Clip paths attached so far, in detection order.
    pub fn clips(&self) -> Vec<PathBuf> {
        self.records()
            .into_iter()
            .filter_map(|record| record.video_file)
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record_detection(
        &self,
        camera_id: CameraId,
        label: ClassLabel,
        zone: Option<&str>,
    ) -> Result<DetectionId> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(anyhow!("event sink unavailable"));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("event sink lock poisoned"))?;
        let id = DetectionId(records.len() as i64 + 1);
        records.push(DetectionRecord {
            id,
            camera_id,
            label,
            zone: zone.map(str::to_string),
            created_at: crate::now_s()?,
            video_file: None,
        });
        Ok(id)
    }

    fn attach_clip(&self, detection_id: DetectionId, clip_path: &Path) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("event sink lock poisoned"))?;
        let record = records
            .iter_mut()
            .find(|record| record.id == detection_id)
            .ok_or_else(|| anyhow!("unknown detection {}", detection_id.0))?;
        record.video_file = Some(clip_path.to_path_buf());
        Ok(())
    }
}
