//! Frame ingestion sources.
//!
//! This module provides different sources for camera frames:
//! - HTTP MJPEG / JPEG snapshot endpoints (IP webcams)
//! - RTSP streams (feature: rtsp-gstreamer; `stub://` synthetic otherwise)
//! - Local MJPEG files (replay)
//!
//! All sources produce decoded `Frame`s. A failed `next_frame` is a transient
//! miss: the worker sleeps briefly and asks again.

pub mod file;
pub mod http;
pub(crate) mod mjpeg;
pub mod rtsp;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use http::{HttpConfig, HttpSource};
pub use rtsp::{RtspConfig, RtspSource};

/// A per-camera stream handle.
pub trait FrameSource: Send {
    /// Open the underlying stream. Called once before the first frame.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. Errors are transient misses.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub locator: String,
}

/// Capture parameters shared by every source kind.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// Target frame rate. Sources decimate (or pace, for synthetic/file) to it.
    pub target_fps: u32,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            target_fps: 16,
            width: 640,
            height: 480,
        }
    }
}

/// Resolves a stream URL into an unconnected frame source.
pub trait SourceFactory: Send + Sync {
    fn open(&self, url: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>>;
}

/// Dispatches by URL scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSourceFactory;

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, url: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
        let scheme = url.split_once("://").map(|(scheme, _)| scheme.to_lowercase());
        match scheme.as_deref() {
            Some("stub") | Some("rtsp") | Some("rtsps") => {
                Ok(Box::new(RtspSource::new(RtspConfig {
                    url: url.to_string(),
                    target_fps: settings.target_fps,
                    width: settings.width,
                    height: settings.height,
                })?))
            }
            Some("http") | Some("https") => Ok(Box::new(HttpSource::new(HttpConfig {
                url: url.to_string(),
                target_fps: settings.target_fps,
            })?)),
            Some("file") | None => Ok(Box::new(FileSource::new(FileConfig {
                path: url.trim_start_matches("file://").to_string(),
                target_fps: settings.target_fps,
                looping: true,
            })?)),
            Some(other) => Err(anyhow!("unsupported stream scheme '{}' in {}", other, url)),
        }
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_dispatches_by_scheme() {
        let settings = SourceSettings::default();
        let factory = DefaultSourceFactory;

        assert!(factory.open("stub://lobby", &settings).is_ok());
        assert!(factory.open("http://127.0.0.1:8080/video", &settings).is_ok());
        assert!(factory.open("/var/lib/clipwatch/replay.mjpeg", &settings).is_ok());
        assert!(factory.open("ftp://camera/stream", &settings).is_err());
    }

    #[test]
    fn health_grace_has_floor() {
        assert_eq!(health_grace(30), Duration::from_millis(2_000));
        assert_eq!(health_grace(1), Duration::from_millis(6_000));
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
    }
}
