//! Always-on segmented recording with event-triggered clip consolidation.
//!
//! Every frame lands in the open segment. Full segments rotate into a small
//! ring buffer (the "before" window); the oldest one is deleted on eviction.
//! An alert freezes the ring: its contents move into an `AlertSession`, new
//! segments accumulate as "after" footage, and once the after-quota is spent
//! the recorder stitches everything into one annotated clip, reports it to
//! the `EventSink`, and deletes the temporary segments.
//!
//! Consolidation runs inline on the worker thread. A second trigger while a
//! session is open is refused, so at most one clip per camera is in flight.

mod consolidate;
mod overlay;
mod segment;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};

use crate::camera::CameraId;
use crate::detect::ClassLabel;
use crate::frame::Frame;
use crate::sink::{DetectionId, EventSink};

use consolidate::{write_clip, ClipRequest};
use segment::{remove_segment_file, SegmentWriter};

pub use segment::{Segment, SegmentBuffer};

const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Recording geometry, in frames.
#[derive(Clone, Debug, PartialEq)]
pub struct RecorderSettings {
    /// Nominal capture rate; converts frame indices to clip offsets.
    pub fps: u32,
    /// Frames per segment before rotation.
    pub frames_per_segment: u32,
    /// Completed segments kept as pre-event footage.
    pub buffer_capacity: usize,
    /// Frames recorded after a trigger before consolidation.
    pub after_frames: u32,
    pub jpeg_quality: u8,
}

impl RecorderSettings {
    /// Derive frame counts from durations in seconds.
    ///
    /// Buffer capacity is `ceil(before / segment)` segments.
    pub fn from_durations(
        fps: u32,
        segment_secs: f64,
        before_secs: f64,
        after_secs: f64,
    ) -> Result<Self> {
        if fps == 0 {
            return Err(anyhow!("recorder fps must be > 0"));
        }
        if !(segment_secs > 0.0) || before_secs < 0.0 || !(after_secs > 0.0) {
            return Err(anyhow!(
                "recorder durations must be positive (segment {}s, before {}s, after {}s)",
                segment_secs,
                before_secs,
                after_secs
            ));
        }
        let frames_per_segment = ((segment_secs * fps as f64).round() as u32).max(1);
        let segment_secs = frames_per_segment as f64 / fps as f64;
        let settings = Self {
            fps,
            frames_per_segment,
            buffer_capacity: (before_secs / segment_secs - 1e-9).ceil().max(0.0) as usize,
            after_frames: ((after_secs * fps as f64).round() as u32).max(1),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 || self.frames_per_segment == 0 || self.after_frames == 0 {
            return Err(anyhow!(
                "recorder fps, frames_per_segment and after_frames must be > 0"
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        Ok(())
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            fps: 16,
            frames_per_segment: 160,
            buffer_capacity: 1,
            after_frames: 320,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A triggered alert waiting for its after-footage.
#[derive(Clone, Debug)]
pub struct AlertSession {
    pub trigger_time: SystemTime,
    pub label: ClassLabel,
    pub confidence: f32,
    pub detection_id: DetectionId,
    pub before_segments: Vec<Segment>,
    pub after_segments: Vec<Segment>,
    pub after_frames_remaining: u32,
    /// Frames recorded before the trigger, open segment included.
    pub frames_before_trigger: u64,
}

pub struct SegmentRecorder {
    camera_id: CameraId,
    camera_dir: PathBuf,
    segment_dir: PathBuf,
    settings: RecorderSettings,
    sink: Arc<dyn EventSink>,
    buffer: SegmentBuffer,
    current: Option<SegmentWriter>,
    session: Option<AlertSession>,
    next_segment: u64,
    clips_written: u64,
    write_failures: u64,
}

impl SegmentRecorder {
    /// Create the recorder for one camera under `output_root/cam<ID>/`.
    ///
    /// Leftover segments and partial clips from an earlier run are removed.
    pub fn new(
        camera_id: CameraId,
        output_root: &Path,
        settings: RecorderSettings,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        settings.validate()?;
        let camera_dir = output_root.join(format!("cam{}", camera_id));
        let segment_dir = camera_dir.join("segments");
        fs::create_dir_all(&segment_dir)
            .with_context(|| format!("create recording dir {}", segment_dir.display()))?;
        remove_stale_files(&segment_dir, "mjpeg");
        remove_stale_files(&camera_dir, "part");

        Ok(Self {
            camera_id,
            camera_dir,
            segment_dir,
            buffer: SegmentBuffer::new(settings.buffer_capacity),
            settings,
            sink,
            current: None,
            session: None,
            next_segment: 0,
            clips_written: 0,
            write_failures: 0,
        })
    }

    /// Record one frame.
    ///
    /// Returns the clip path when this frame completed an alert session.
    /// Write errors are logged and the frame is dropped from the recording.
    pub fn add_frame(&mut self, frame: &Frame) -> Option<PathBuf> {
        if let Err(e) = self.write_frame(frame) {
            self.write_failures += 1;
            log::warn!(
                "camera {}: frame dropped from recording: {:#}",
                self.camera_id,
                e
            );
        }

        let session = self.session.as_mut()?;
        session.after_frames_remaining = session.after_frames_remaining.saturating_sub(1);
        if session.after_frames_remaining > 0 {
            return None;
        }
        self.consolidate()
    }

    /// Open an alert session. Returns false if one is already active.
    pub fn trigger_alert(
        &mut self,
        label: ClassLabel,
        confidence: f32,
        detection_id: DetectionId,
    ) -> bool {
        if let Some(active) = self.session.as_ref() {
            log::warn!(
                "camera {}: alert {} ignored, detection {} is still recording",
                self.camera_id,
                detection_id.0,
                active.detection_id.0
            );
            return false;
        }

        let before_segments = self.buffer.take_all();
        let open_frames = self
            .current
            .as_ref()
            .map(|writer| writer.frame_count() as u64)
            .unwrap_or(0);
        let frames_before_trigger = before_segments
            .iter()
            .map(|s| s.frame_count as u64)
            .sum::<u64>()
            + open_frames;
        log::info!(
            "camera {}: recording alert {} ({} {:.2}), {} frames of pre-event footage",
            self.camera_id,
            detection_id.0,
            label,
            confidence,
            frames_before_trigger
        );
        self.session = Some(AlertSession {
            trigger_time: SystemTime::now(),
            label,
            confidence,
            detection_id,
            before_segments,
            after_segments: Vec::new(),
            after_frames_remaining: self.settings.after_frames,
            frames_before_trigger,
        });
        true
    }

    /// Flush an active session early and delete every temporary file.
    pub fn shutdown(&mut self) -> Option<PathBuf> {
        let clip = if self.session.is_some() {
            log::info!(
                "camera {}: flushing alert clip before shutdown",
                self.camera_id
            );
            self.consolidate()
        } else {
            None
        };
        self.discard_temporaries();
        clip
    }

    pub fn camera_dir(&self) -> &Path {
        &self.camera_dir
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&AlertSession> {
        self.session.as_ref()
    }

    pub fn is_recording_alert(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffer(&self) -> &SegmentBuffer {
        &self.buffer
    }

    /// Frames in the segment currently being written.
    pub fn open_segment_frames(&self) -> u32 {
        self.current
            .as_ref()
            .map(|writer| writer.frame_count())
            .unwrap_or(0)
    }

    pub fn clips_written(&self) -> u64 {
        self.clips_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.current.is_none() {
            self.current = Some(self.open_segment()?);
        }
        let quality = self.settings.jpeg_quality;
        let writer = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow!("no open segment"))?;
        writer.write_frame(frame, quality)?;
        if writer.frame_count() >= self.settings.frames_per_segment {
            self.rotate()?;
        }
        Ok(())
    }

    fn open_segment(&mut self) -> Result<SegmentWriter> {
        let path = self
            .segment_dir
            .join(format!("seg_{:08}.mjpeg", self.next_segment));
        self.next_segment += 1;
        SegmentWriter::create(path)
    }

    /// Close the open segment and file it: after-footage during a session,
    /// the ring buffer otherwise. An evicted segment is deleted before the
    /// next segment is opened.
    fn rotate(&mut self) -> Result<()> {
        let Some(writer) = self.current.take() else {
            return Ok(());
        };
        let segment = writer.finish()?;
        if segment.frame_count == 0 {
            remove_segment_file(&segment.path);
            return Ok(());
        }
        log::debug!(
            "camera {}: segment {} rotated ({} frames)",
            self.camera_id,
            segment.path.display(),
            segment.frame_count
        );
        if let Some(session) = self.session.as_mut() {
            session.after_segments.push(segment);
            return Ok(());
        }
        if let Some(evicted) = self.buffer.push(segment) {
            remove_segment_file(&evicted.path);
        }
        Ok(())
    }

    fn consolidate(&mut self) -> Option<PathBuf> {
        let mut session = self.session.take()?;
        if let Some(writer) = self.current.take() {
            match writer.finish() {
                Ok(segment) if segment.frame_count > 0 => session.after_segments.push(segment),
                Ok(segment) => {
                    remove_segment_file(&segment.path);
                }
                Err(e) => log::warn!(
                    "camera {}: losing open segment during consolidation: {:#}",
                    self.camera_id,
                    e
                ),
            }
        }

        let segments: Vec<Segment> = session
            .before_segments
            .drain(..)
            .chain(session.after_segments.drain(..))
            .collect();
        let request = ClipRequest {
            camera_id: self.camera_id,
            label: session.label,
            confidence: session.confidence,
            trigger_time: session.trigger_time,
            frames_before_trigger: session.frames_before_trigger,
            fps: self.settings.fps,
            jpeg_quality: self.settings.jpeg_quality,
        };
        let result = write_clip(&self.camera_dir, &segments, &request);

        for segment in &segments {
            remove_segment_file(&segment.path);
        }
        for stale in self.buffer.take_all() {
            remove_segment_file(&stale.path);
        }

        match result {
            Ok(clip) => {
                self.clips_written += 1;
                log::info!(
                    "camera {}: clip {} written ({} frames) for detection {}",
                    self.camera_id,
                    clip.path.display(),
                    clip.frames,
                    session.detection_id.0
                );
                if let Err(e) = self.sink.attach_clip(session.detection_id, &clip.path) {
                    log::warn!(
                        "camera {}: failed to attach clip to detection {}: {:#}",
                        self.camera_id,
                        session.detection_id.0,
                        e
                    );
                }
                Some(clip.path)
            }
            Err(e) => {
                log::error!(
                    "camera {}: consolidation failed for detection {}: {:#}",
                    self.camera_id,
                    session.detection_id.0,
                    e
                );
                None
            }
        }
    }

    fn discard_temporaries(&mut self) {
        if let Some(writer) = self.current.take() {
            writer.abandon();
        }
        for segment in self.buffer.take_all() {
            remove_segment_file(&segment.path);
        }
        if let Some(session) = self.session.take() {
            for segment in session
                .before_segments
                .iter()
                .chain(session.after_segments.iter())
            {
                remove_segment_file(&segment.path);
            }
        }
    }
}

impl Drop for SegmentRecorder {
    fn drop(&mut self) {
        self.discard_temporaries();
    }
}

fn remove_stale_files(dir: &Path, extension: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            log::debug!("removing stale recording file {}", path.display());
            remove_segment_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemoryEventSink;

    fn settings() -> RecorderSettings {
        RecorderSettings {
            fps: 4,
            frames_per_segment: 2,
            buffer_capacity: 2,
            after_frames: 4,
            jpeg_quality: 80,
        }
    }

    fn frame(i: u8) -> Frame {
        Frame::solid(32, 24, [i, i, i])
    }

    fn segment_files(recorder: &SegmentRecorder) -> usize {
        fs::read_dir(recorder.camera_dir().join("segments"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn durations_convert_to_frames() -> Result<()> {
        let settings = RecorderSettings::from_durations(16, 10.0, 10.0, 20.0)?;
        assert_eq!(settings.frames_per_segment, 160);
        assert_eq!(settings.buffer_capacity, 1);
        assert_eq!(settings.after_frames, 320);

        let settings = RecorderSettings::from_durations(10, 2.0, 5.0, 1.0)?;
        assert_eq!(settings.buffer_capacity, 3);

        assert!(RecorderSettings::from_durations(0, 1.0, 1.0, 1.0).is_err());
        assert!(RecorderSettings::from_durations(10, 0.0, 1.0, 1.0).is_err());
        Ok(())
    }

    #[test]
    fn ring_buffer_evicts_and_deletes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let mut recorder = SegmentRecorder::new(1, dir.path(), settings(), sink)?;

        for i in 0..10 {
            assert!(recorder.add_frame(&frame(i)).is_none());
        }
        assert_eq!(recorder.buffer().len(), 2);
        assert_eq!(segment_files(&recorder), 2);
        Ok(())
    }

    #[test]
    fn second_trigger_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let mut recorder = SegmentRecorder::new(1, dir.path(), settings(), sink)?;
        for i in 0..4 {
            recorder.add_frame(&frame(i));
        }

        assert!(recorder.trigger_alert(ClassLabel::Violence, 0.9, DetectionId(1)));
        assert!(!recorder.trigger_alert(ClassLabel::Violence, 0.9, DetectionId(2)));
        let session = recorder.session().expect("active session");
        assert_eq!(session.detection_id, DetectionId(1));
        assert_eq!(session.before_segments.len(), 2);
        Ok(())
    }

    #[test]
    fn session_consolidates_and_attaches_clip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let id = sink.record_detection(1, ClassLabel::Violence, None)?;
        let mut recorder = SegmentRecorder::new(1, dir.path(), settings(), sink.clone())?;

        for i in 0..5 {
            recorder.add_frame(&frame(i * 10));
        }
        assert!(recorder.trigger_alert(ClassLabel::Violence, 0.9, id));
        assert_eq!(recorder.session().map(|s| s.frames_before_trigger), Some(5));

        let mut clip = None;
        for i in 0..4 {
            clip = recorder.add_frame(&frame(100 + i));
        }
        let clip = clip.expect("clip after the fourth after-frame");
        assert!(clip.exists());
        assert!(clip.starts_with(recorder.camera_dir()));
        assert_eq!(sink.clips(), vec![clip]);
        assert!(!recorder.is_recording_alert());
        assert!(recorder.buffer().is_empty());
        assert_eq!(recorder.open_segment_frames(), 0);
        assert_eq!(segment_files(&recorder), 0);
        assert_eq!(recorder.clips_written(), 1);
        Ok(())
    }

    #[test]
    fn failed_consolidation_resets_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let mut recorder = SegmentRecorder::new(1, dir.path(), settings(), sink.clone())?;
        for i in 0..4 {
            recorder.add_frame(&frame(i));
        }
        assert!(recorder.trigger_alert(ClassLabel::Violence, 0.9, DetectionId(1)));

        // Pull the pre-event footage out from under the session.
        fs::remove_dir_all(recorder.camera_dir().join("segments"))?;
        for i in 0..4 {
            assert!(recorder.add_frame(&frame(i)).is_none());
        }
        assert!(!recorder.is_recording_alert());
        assert!(sink.clips().is_empty());

        // A later alert still records.
        fs::create_dir_all(recorder.camera_dir().join("segments"))?;
        for i in 0..4 {
            recorder.add_frame(&frame(i));
        }
        assert!(recorder.trigger_alert(ClassLabel::Violence, 0.9, DetectionId(2)));
        Ok(())
    }

    #[test]
    fn shutdown_flushes_partial_session() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let id = sink.record_detection(1, ClassLabel::Weaponized, None)?;
        let mut recorder = SegmentRecorder::new(1, dir.path(), settings(), sink.clone())?;
        for i in 0..3 {
            recorder.add_frame(&frame(i));
        }
        recorder.trigger_alert(ClassLabel::Weaponized, 0.8, id);
        recorder.add_frame(&frame(50));

        let clip = recorder.shutdown().expect("flushed clip");
        assert!(clip.exists());
        assert_eq!(sink.clips().len(), 1);
        assert_eq!(segment_files(&recorder), 0);
        Ok(())
    }

    #[test]
    fn drop_removes_temporaries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = Arc::new(InMemoryEventSink::new());
        let segments = {
            let mut recorder = SegmentRecorder::new(9, dir.path(), settings(), sink)?;
            for i in 0..5 {
                recorder.add_frame(&frame(i));
            }
            recorder.camera_dir().join("segments")
        };
        assert_eq!(fs::read_dir(segments)?.count(), 0);
        Ok(())
    }
}
