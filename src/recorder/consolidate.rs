//! Clip consolidation: before + after segments into one annotated file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use super::overlay::{annotate, OverlayInfo};
use super::segment::{open_segment_reader, Segment};
use crate::camera::CameraId;
use crate::detect::ClassLabel;
use crate::frame::Frame;
use crate::ingest::mjpeg::encode_jpeg;

/// Everything the clip writer needs besides the segments.
pub(crate) struct ClipRequest {
    pub camera_id: CameraId,
    pub label: ClassLabel,
    pub confidence: f32,
    pub trigger_time: SystemTime,
    /// Frames recorded before the trigger instant.
    pub frames_before_trigger: u64,
    pub fps: u32,
    pub jpeg_quality: u8,
}

/// A finished clip.
#[derive(Clone, Debug)]
pub(crate) struct Clip {
    pub path: PathBuf,
    pub frames: u64,
}

/// `cam<ID>_<label>_<YYYYmmdd_HHMMSS_mmm>.mjpeg` under `dir`, suffixed if taken.
pub(crate) fn clip_path(
    dir: &Path,
    camera_id: CameraId,
    label: ClassLabel,
    trigger_time: SystemTime,
) -> PathBuf {
    let stamp = DateTime::<Utc>::from(trigger_time).format("%Y%m%d_%H%M%S_%3f");
    let stem = format!("cam{}_{}_{}", camera_id, label.slug(), stamp);
    let mut candidate = dir.join(format!("{}.mjpeg", stem));
    let mut n = 1u32;
    while candidate.exists() || part_path(&candidate).exists() {
        candidate = dir.join(format!("{}_{}.mjpeg", stem, n));
        n += 1;
    }
    candidate
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Write `segments` (already in chronological order) as one annotated clip.
///
/// The clip appears under its final name only once complete.
pub(crate) fn write_clip(dir: &Path, segments: &[Segment], request: &ClipRequest) -> Result<Clip> {
    if request.fps == 0 {
        return Err(anyhow!("clip fps must be > 0"));
    }
    let expected: u64 = segments.iter().map(|s| s.frame_count as u64).sum();
    if expected == 0 {
        return Err(anyhow!("no recorded frames to consolidate"));
    }

    let path = clip_path(dir, request.camera_id, request.label, request.trigger_time);
    let part = part_path(&path);
    match write_frames(&part, segments, request, expected) {
        Ok(frames) => {
            if let Err(e) = fs::rename(&part, &path) {
                let _ = fs::remove_file(&part);
                return Err(e).with_context(|| format!("finalize clip {}", path.display()));
            }
            Ok(Clip { path, frames })
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

fn write_frames(
    part: &Path,
    segments: &[Segment],
    request: &ClipRequest,
    expected: u64,
) -> Result<u64> {
    let file = File::create(part).with_context(|| format!("create clip {}", part.display()))?;
    let mut out = BufWriter::new(file);
    let trigger_progress = request.frames_before_trigger as f32 / expected as f32;

    let mut index = 0u64;
    for segment in segments {
        // A lost segment leaves a gap; the rest of the clip is still kept.
        let mut reader = match open_segment_reader(&segment.path) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!(
                    "camera {}: skipping segment {}: {:#}",
                    request.camera_id,
                    segment.path.display(),
                    e
                );
                continue;
            }
        };
        let mut read = 0u32;
        loop {
            let frame = match reader.read_next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!(
                        "camera {}: segment {} unreadable after {} frames: {:#}",
                        request.camera_id,
                        segment.path.display(),
                        read,
                        e
                    );
                    break;
                }
            };
            let offset_secs =
                (index as f64 - request.frames_before_trigger as f64) / request.fps as f64;
            let mut image = frame.to_image()?;
            annotate(
                &mut image,
                &OverlayInfo {
                    camera_id: request.camera_id,
                    label: request.label,
                    confidence: request.confidence,
                    offset_secs,
                    progress: index as f32 / expected as f32,
                    trigger_progress,
                },
            );
            let jpeg = encode_jpeg(&Frame::from_image(image), request.jpeg_quality)?;
            out.write_all(&jpeg)
                .with_context(|| format!("write clip {}", part.display()))?;
            index += 1;
            read += 1;
        }
        if read != segment.frame_count {
            log::warn!(
                "camera {}: segment {} held {} frames, expected {}",
                request.camera_id,
                segment.path.display(),
                read,
                segment.frame_count
            );
        }
    }
    out.flush()
        .with_context(|| format!("flush clip {}", part.display()))?;
    if index == 0 {
        return Err(anyhow!("segments contained no readable frames"));
    }
    if index != expected {
        log::warn!(
            "camera {}: clip {} has {} frames, expected {}",
            request.camera_id,
            part.display(),
            index,
            expected
        );
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mjpeg::MjpegReader;
    use crate::recorder::segment::SegmentWriter;
    use std::io::BufReader;
    use std::time::{Duration, UNIX_EPOCH};

    fn request() -> ClipRequest {
        ClipRequest {
            camera_id: 3,
            label: ClassLabel::Violence,
            confidence: 0.9,
            trigger_time: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            frames_before_trigger: 2,
            fps: 4,
            jpeg_quality: 85,
        }
    }

    fn write_segment(dir: &Path, name: &str, shades: &[u8]) -> Result<Segment> {
        let mut writer = SegmentWriter::create(dir.join(name))?;
        for shade in shades {
            writer.write_frame(&Frame::solid(160, 120, [*shade, *shade, *shade]), 90)?;
        }
        writer.finish()
    }

    #[test]
    fn clip_names_are_deterministic_and_unique() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let req = request();
        let first = clip_path(dir.path(), 3, ClassLabel::Violence, req.trigger_time);
        assert_eq!(
            first.file_name().and_then(|n| n.to_str()),
            Some("cam3_Violence_20231114_221320_123.mjpeg")
        );

        fs::write(&first, b"taken")?;
        let second = clip_path(dir.path(), 3, ClassLabel::Violence, req.trigger_time);
        assert_ne!(first, second);
        assert!(second
            .to_string_lossy()
            .ends_with("cam3_Violence_20231114_221320_123_1.mjpeg"));
        Ok(())
    }

    #[test]
    fn clip_concatenates_segments_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let segments = vec![
            write_segment(dir.path(), "a.mjpeg", &[0, 40])?,
            write_segment(dir.path(), "b.mjpeg", &[80, 120])?,
            write_segment(dir.path(), "c.mjpeg", &[160])?,
        ];

        let clip = write_clip(dir.path(), &segments, &request())?;
        assert_eq!(clip.frames, 5);
        assert!(!part_path(&clip.path).exists());

        let mut reader = MjpegReader::new(BufReader::new(File::open(&clip.path)?));
        let mut shades = Vec::new();
        while let Some(frame) = reader.read_next_frame()? {
            // Sample below the banner and above the timeline bar.
            let image = frame.to_image()?;
            shades.push(image.get_pixel(120, 70).0[0]);
        }
        assert_eq!(shades.len(), 5);
        assert!(shades.windows(2).all(|w| w[0] < w[1]), "{:?}", shades);
        Ok(())
    }

    #[test]
    fn empty_input_is_an_error_and_leaves_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(write_clip(dir.path(), &[], &request()).is_err());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn missing_segment_file_cleans_partial_clip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let segments = vec![Segment {
            path: dir.path().join("gone.mjpeg"),
            frame_count: 2,
            created_at: SystemTime::now(),
        }];
        assert!(write_clip(dir.path(), &segments, &request()).is_err());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn lost_segment_is_skipped_and_clip_kept() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let segments = vec![
            write_segment(dir.path(), "a.mjpeg", &[0, 40])?,
            write_segment(dir.path(), "b.mjpeg", &[80, 120])?,
            write_segment(dir.path(), "c.mjpeg", &[160])?,
        ];
        fs::remove_file(&segments[1].path)?;

        let clip = write_clip(dir.path(), &segments, &request())?;
        assert_eq!(clip.frames, 3);
        assert!(clip.path.exists());
        assert!(!part_path(&clip.path).exists());

        let mut reader = MjpegReader::new(BufReader::new(File::open(&clip.path)?));
        let mut shades = Vec::new();
        while let Some(frame) = reader.read_next_frame()? {
            let image = frame.to_image()?;
            shades.push(image.get_pixel(120, 70).0[0]);
        }
        assert_eq!(shades.len(), 3);
        // 0, 40, then 160: the gap is where the lost segment was.
        assert!(shades[1] < 80 && shades[2] > 120, "{:?}", shades);
        Ok(())
    }
}
