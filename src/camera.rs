//! Camera identity and stream locator resolution.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;

pub type CameraId = u64;

/// Builds a stream URL from a bare locator (host, address, path).
pub type LocatorBuilder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// How a camera exposes its stream.
///
/// Resolved into a concrete stream URL once, when the worker is built.
#[derive(Clone)]
pub enum CameraKind {
    /// Phone/IP-webcam style HTTP MJPEG endpoint on port 8080.
    Http,
    /// RTSP camera on the default port.
    Rtsp,
    /// Anything else; the builder maps the locator to a stream URL.
    Other(LocatorBuilder),
}

impl CameraKind {
    /// Parse a configured kind name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "http" | "ip webcam" | "ip_webcam" | "mjpeg" => Ok(CameraKind::Http),
            "rtsp" => Ok(CameraKind::Rtsp),
            "url" | "file" | "stub" | "other" => Ok(CameraKind::passthrough()),
            other => Err(anyhow!("unsupported camera kind '{}'", other)),
        }
    }

    /// `Other` kind that uses the locator verbatim.
    pub fn passthrough() -> Self {
        CameraKind::Other(Arc::new(|locator: &str| locator.to_string()))
    }

    /// Resolve a locator into the stream URL the frame source opens.
    ///
    /// Locators that already carry a scheme are used as-is for `Http`/`Rtsp`.
    pub fn resolve(&self, locator: &str) -> String {
        let locator = locator.trim();
        match self {
            CameraKind::Other(builder) => builder(locator),
            _ if locator.contains("://") => locator.to_string(),
            CameraKind::Http => format!("http://{}:8080/video", locator),
            CameraKind::Rtsp => format!("rtsp://{}:554/", locator),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraKind::Http => "http",
            CameraKind::Rtsp => "rtsp",
            CameraKind::Other(_) => "other",
        }
    }
}

impl fmt::Debug for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered camera. Identity is `id`.
#[derive(Clone, Debug)]
pub struct CameraHandle {
    pub id: CameraId,
    pub kind: CameraKind,
    pub locator: String,
    /// Local zone id reported with detections.
    pub zone: Option<String>,
}

impl CameraHandle {
    pub fn new(id: CameraId, kind: CameraKind, locator: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            locator: locator.into(),
            zone: None,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn stream_url(&self) -> String {
        self.kind.resolve(&self.locator)
    }
}
