//! clipwatch
//!
//! Per-camera event detection with pre/post-event alert clip recording.
//!
//! # Architecture
//!
//! Every camera runs on its own worker thread. The worker:
//!
//! 1. Pulls frames from a `FrameSource` (HTTP MJPEG, RTSP, local file).
//! 2. Records every frame into short MJPEG segments kept in a circular buffer.
//! 3. Batches normalized copies into non-overlapping windows for a `Classifier`.
//! 4. On an alert verdict outside the cooldown, records a detection through the
//!    `EventSink` and asks the recorder for a clip.
//! 5. The recorder keeps the buffered "before" segments alive, captures the
//!    "after" tail, and stitches both into one annotated clip.
//!
//! `CameraManager` owns the registry of running workers. Classifier and sink
//! are built once by the caller and shared with every worker by handle.
//!
//! # Module Structure
//!
//! - `camera`: camera identity and stream locator resolution
//! - `frame`: decoded frames, normalization, classification windows
//! - `ingest`: frame sources
//! - `detect`: classifier trait, verdicts, backends
//! - `sink`: detection persistence collaborators
//! - `recorder`: segmented recording and clip consolidation
//! - `worker`: per-camera loop and alert/cooldown state machine
//! - `manager`: worker registry
//! - `config`: daemon configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod camera;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod manager;
pub mod recorder;
pub mod sink;
pub mod worker;

pub use camera::{CameraHandle, CameraId, CameraKind, LocatorBuilder};
pub use detect::{
    ClassLabel, ClassificationResult, Classifier, MotionClassifier, SharedClassifier,
    StubClassifier, StubVerdict,
};
pub use frame::{normalize, Frame, FrameWindow, NormalizedFrame};
pub use ingest::{
    DefaultSourceFactory, FileSource, FrameSource, HttpSource, RtspSource, SourceFactory,
    SourceSettings, SourceStats,
};
pub use manager::CameraManager;
pub use recorder::{AlertSession, RecorderSettings, Segment, SegmentBuffer, SegmentRecorder};
pub use sink::{DetectionId, DetectionRecord, EventSink, InMemoryEventSink, SqliteEventSink};
pub use worker::{
    AlertController, AlertDecision, AlertPhase, CameraWorker, Step, WorkerSettings, WorkerStats,
    WorkerStatus,
};

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Validate a local zone identifier (`zone:<slug>`).
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").expect("zone id pattern is valid")
    });
    if !re.is_match(zone_id) {
        return Err(anyhow!(
            "invalid zone_id '{}': expected zone:<lowercase slug, max 64 chars>",
            zone_id
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_ids_are_validated() {
        assert!(validate_zone_id("zone:lobby").is_ok());
        assert!(validate_zone_id("zone:loading_bay-2").is_ok());
        assert!(validate_zone_id("lobby").is_err());
        assert!(validate_zone_id("zone:Lobby").is_err());
        assert!(validate_zone_id("zone:").is_err());
    }
}
