use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{CameraHandle, CameraId, CameraKind};
use crate::detect::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::frame::{DEFAULT_INPUT_SIZE, DEFAULT_WINDOW_SIZE};
use crate::ingest::SourceSettings;
use crate::recorder::RecorderSettings;
use crate::worker::WorkerSettings;

const DEFAULT_OUTPUT_ROOT: &str = "media";
const DEFAULT_DB_PATH: &str = "detections.db";
const DEFAULT_FPS: u32 = 16;
const DEFAULT_SEGMENT_SECS: f64 = 10.0;
const DEFAULT_BEFORE_SECS: f64 = 10.0;
const DEFAULT_AFTER_SECS: f64 = 20.0;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_BACKEND: &str = "motion";
const DEFAULT_READ_RETRY_MS: u64 = 100;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;

const BACKENDS: [&str; 3] = ["motion", "stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    output_root: Option<PathBuf>,
    db_path: Option<String>,
    window: Option<WindowConfigFile>,
    recorder: Option<RecorderConfigFile>,
    alerts: Option<AlertsConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    worker: Option<WorkerConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct WindowConfigFile {
    size: Option<usize>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    fps: Option<u32>,
    segment_secs: Option<f64>,
    before_secs: Option<f64>,
    after_secs: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<u64>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    read_retry_ms: Option<u64>,
    stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: CameraId,
    kind: String,
    locator: String,
    zone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub output_root: PathBuf,
    pub db_path: String,
    pub window: WindowSettings,
    pub recorder: RecordingSettings,
    pub alerts: AlertSettings,
    pub classifier: ClassifierSettings,
    pub worker: LoopSettings,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub size: usize,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub fps: u32,
    pub segment_secs: f64,
    pub before_secs: f64,
    pub after_secs: f64,
    /// Frame size for synthetic sources.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub read_retry: Duration,
    pub stop_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub id: CameraId,
    pub kind: String,
    pub locator: String,
    pub zone: Option<String>,
}

impl DaemonConfig {
    /// Defaults, then the file named by `CLIPWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLIPWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file instead of `CLIPWATCH_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DaemonConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let window = file.window.unwrap_or_default();
        let recorder = file.recorder.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();
        let worker = file.worker.unwrap_or_default();
        Self {
            output_root: file
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            window: WindowSettings {
                size: window.size.unwrap_or(DEFAULT_WINDOW_SIZE),
                input_size: window.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            recorder: RecordingSettings {
                fps: recorder.fps.unwrap_or(DEFAULT_FPS),
                segment_secs: recorder.segment_secs.unwrap_or(DEFAULT_SEGMENT_SECS),
                before_secs: recorder.before_secs.unwrap_or(DEFAULT_BEFORE_SECS),
                after_secs: recorder.after_secs.unwrap_or(DEFAULT_AFTER_SECS),
                width: recorder.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: recorder.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            },
            alerts: AlertSettings {
                cooldown: Duration::from_secs(
                    alerts.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
                confidence_threshold: alerts
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            },
            classifier: ClassifierSettings {
                backend: classifier
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: classifier.model_path,
            },
            worker: LoopSettings {
                read_retry: Duration::from_millis(
                    worker.read_retry_ms.unwrap_or(DEFAULT_READ_RETRY_MS),
                ),
                stop_timeout: Duration::from_secs(
                    worker.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
                ),
            },
            cameras: file
                .cameras
                .unwrap_or_default()
                .into_iter()
                .map(|camera| CameraConfig {
                    id: camera.id,
                    kind: camera.kind,
                    locator: camera.locator,
                    zone: camera.zone,
                })
                .collect(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("CLIPWATCH_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root);
            }
        }
        if let Ok(path) = std::env::var("CLIPWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(cooldown) = std::env::var("CLIPWATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("CLIPWATCH_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(backend) = std::env::var("CLIPWATCH_CLASSIFIER") {
            if !backend.trim().is_empty() {
                self.classifier.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("CLIPWATCH_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(cameras) = std::env::var("CLIPWATCH_CAMERAS") {
            let parsed = split_csv(&cameras)
                .iter()
                .map(|entry| parse_camera_entry(entry))
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.window.size == 0 || self.window.input_size == 0 {
            return Err(anyhow!("window size and input size must be greater than zero"));
        }
        self.recorder_settings()?;
        if self.recorder.width == 0 || self.recorder.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        let threshold = self.alerts.confidence_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(anyhow!(
                "confidence_threshold must be in (0, 1), got {}",
                threshold
            ));
        }

        self.classifier.backend = self.classifier.backend.to_lowercase();
        if !BACKENDS.contains(&self.classifier.backend.as_str()) {
            return Err(anyhow!(
                "unknown classifier backend '{}' (expected one of {})",
                self.classifier.backend,
                BACKENDS.join(", ")
            ));
        }
        if self.classifier.backend == "tract" && self.classifier.model_path.is_none() {
            return Err(anyhow!("classifier backend 'tract' requires model_path"));
        }

        let mut seen = HashSet::new();
        for camera in &mut self.cameras {
            if !seen.insert(camera.id) {
                return Err(anyhow!("duplicate camera id {}", camera.id));
            }
            CameraKind::parse(&camera.kind)?;
            if camera.locator.trim().is_empty() {
                return Err(anyhow!("camera {} has an empty locator", camera.id));
            }
            if let Some(zone) = camera.zone.as_mut() {
                *zone = zone.trim().to_lowercase();
                crate::validate_zone_id(zone)?;
            }
        }
        Ok(())
    }

    /// Recorder geometry in frames.
    pub fn recorder_settings(&self) -> Result<RecorderSettings> {
        RecorderSettings::from_durations(
            self.recorder.fps,
            self.recorder.segment_secs,
            self.recorder.before_secs,
            self.recorder.after_secs,
        )
    }

    /// Settings shared by every worker.
    pub fn worker_settings(&self) -> Result<WorkerSettings> {
        Ok(WorkerSettings {
            output_root: self.output_root.clone(),
            window_size: self.window.size,
            input_size: self.window.input_size,
            recorder: self.recorder_settings()?,
            cooldown: self.alerts.cooldown,
            read_retry: self.worker.read_retry,
            source: SourceSettings {
                target_fps: self.recorder.fps,
                width: self.recorder.width,
                height: self.recorder.height,
            },
        })
    }

    /// Configured cameras as handles ready for `CameraManager::start_camera`.
    pub fn camera_handles(&self) -> Result<Vec<CameraHandle>> {
        self.cameras
            .iter()
            .map(|camera| {
                let handle =
                    CameraHandle::new(camera.id, CameraKind::parse(&camera.kind)?, &camera.locator);
                Ok(match camera.zone.as_ref() {
                    Some(zone) => handle.with_zone(zone),
                    None => handle,
                })
            })
            .collect()
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// `id=kind:locator`, e.g. `3=rtsp:10.0.0.5` or `4=url:stub://lobby`.
fn parse_camera_entry(entry: &str) -> Result<CameraConfig> {
    let (id, rest) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("camera entry '{}' must look like id=kind:locator", entry))?;
    let id: CameraId = id
        .trim()
        .parse()
        .map_err(|_| anyhow!("camera entry '{}' has a non-numeric id", entry))?;
    let (kind, locator) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("camera entry '{}' must look like id=kind:locator", entry))?;
    Ok(CameraConfig {
        id,
        kind: kind.trim().to_string(),
        locator: locator.trim().to_string(),
        zone: None,
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_entries_parse() -> Result<()> {
        let camera = parse_camera_entry("4=url:stub://lobby")?;
        assert_eq!(camera.id, 4);
        assert_eq!(camera.kind, "url");
        assert_eq!(camera.locator, "stub://lobby");

        assert!(parse_camera_entry("x=http:1.2.3.4").is_err());
        assert!(parse_camera_entry("5").is_err());
        assert!(parse_camera_entry("5=http").is_err());
        Ok(())
    }

    #[test]
    fn defaults_validate() -> Result<()> {
        let mut cfg = DaemonConfig::from_file(DaemonConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.classifier.backend, "motion");
        let settings = cfg.worker_settings()?;
        assert_eq!(settings.window_size, 16);
        assert_eq!(settings.recorder.frames_per_segment, 160);
        assert_eq!(settings.recorder.after_frames, 320);
        assert_eq!(settings.cooldown, Duration::from_secs(60));
        Ok(())
    }
}
