//! Local file frame source.
//!
//! This module provides `FileSource` for replaying local MJPEG recordings
//! (including clips written by this crate) as if they were a live camera.
//! The file source is responsible for:
//! - Reading frames from a local file (no network access)
//! - Pacing output to the target frame rate
//! - Rewinding at end of file when looping

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use super::mjpeg::MjpegReader;
use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/clipwatch/replay.mjpeg").
    pub path: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Rewind at end of file instead of reporting misses.
    pub looping: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 16,
            looping: true,
        }
    }
}

/// Local MJPEG file source.
pub struct FileSource {
    config: FileConfig,
    reader: Option<MjpegReader<BufReader<File>>>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    exhausted: bool,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            config,
            reader: None,
            frame_count: 0,
            last_frame_at: None,
            exhausted: false,
        })
    }

    fn open(&mut self) -> Result<()> {
        let path = PathBuf::from(&self.config.path);
        let file = File::open(&path)
            .with_context(|| format!("open replay file {}", path.display()))?;
        self.reader = Some(MjpegReader::new(BufReader::new(file)));
        self.exhausted = false;
        Ok(())
    }

    fn pace(&self) {
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval = frame_interval(self.config.target_fps);
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        self.open()?;
        log::info!("FileSource: opened {}", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.pace();
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("file source not connected; call connect() first"))?;
        if let Some(frame) = reader.read_next_frame()? {
            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());
            return Ok(frame);
        }

        if !self.config.looping {
            self.exhausted = true;
            return Err(anyhow!("replay file {} exhausted", self.config.path));
        }
        self.open()?;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("file source not connected"))?;
        let frame = reader
            .read_next_frame()?
            .ok_or_else(|| anyhow!("replay file {} has no frames", self.config.path))?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        self.reader.is_some() && !self.exhausted
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mjpeg::encode_jpeg;
    use std::io::Write;

    fn write_replay(frames: usize) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        for i in 0..frames {
            let shade = (i * 40) as u8;
            file.write_all(&encode_jpeg(&Frame::solid(8, 8, [shade, 0, 0]), 90)?)?;
        }
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn rejects_urls_and_empty_paths() {
        for path in ["", "  ", "http://camera/video"] {
            let config = FileConfig {
                path: path.to_string(),
                ..FileConfig::default()
            };
            assert!(FileSource::new(config).is_err());
        }
    }

    #[test]
    fn replays_and_loops() -> Result<()> {
        let replay = write_replay(2)?;
        let mut source = FileSource::new(FileConfig {
            path: replay.path().display().to_string(),
            target_fps: 0,
            looping: true,
        })?;
        source.connect()?;

        for _ in 0..5 {
            let frame = source.next_frame()?;
            assert_eq!((frame.width, frame.height), (8, 8));
        }
        assert_eq!(source.stats().frames_captured, 5);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn non_looping_source_reports_exhaustion() -> Result<()> {
        let replay = write_replay(1)?;
        let mut source = FileSource::new(FileConfig {
            path: replay.path().display().to_string(),
            target_fps: 0,
            looping: false,
        })?;
        source.connect()?;

        assert!(source.next_frame().is_ok());
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn missing_file_fails_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = FileSource::new(FileConfig {
            path: dir.path().join("absent.mjpeg").display().to_string(),
            ..FileConfig::default()
        })?;
        assert!(source.connect().is_err());
        Ok(())
    }
}
