//! clipwatchd - per-camera detection and alert clip daemon
//!
//! This daemon:
//! 1. Loads configuration (file from CLIPWATCH_CONFIG / --config, then env)
//! 2. Builds one classifier and one detection store shared by all cameras
//! 3. Starts a worker per configured camera (failures are logged, not fatal)
//! 4. Reports fleet status periodically until Ctrl-C
//! 5. Stops every worker, flushing in-progress alert clips

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use clipwatch::config::DaemonConfig;
use clipwatch::detect::{shared, MotionClassifier, SharedClassifier, StubClassifier};
use clipwatch::{CameraManager, ClassLabel, SqliteEventSink};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch camera streams and record clips around detected incidents"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "CLIPWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for alert clips (overrides the config file).
    #[arg(long, env = "CLIPWATCH_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DaemonConfig::load_from(args.config.as_deref())?;
    if let Some(root) = args.output_root {
        cfg.output_root = root;
    }

    let classifier = build_classifier(&cfg)?;
    let sink = Arc::new(SqliteEventSink::open(&cfg.db_path)?);
    let manager = CameraManager::new(cfg.worker_settings()?, classifier, sink)
        .with_stop_timeout(cfg.worker.stop_timeout);

    log::info!(
        "clipwatchd running. clips under {}, detections in {}",
        cfg.output_root.display(),
        cfg.db_path
    );
    log::info!(
        "classifier={} window={} cooldown={:?}",
        cfg.classifier.backend,
        cfg.window.size,
        cfg.alerts.cooldown
    );

    let cameras = cfg.camera_handles()?;
    if cameras.is_empty() {
        log::warn!("no cameras configured (set CLIPWATCH_CAMERAS or add a cameras section)");
    }
    for camera in cameras {
        let id = camera.id;
        if let Err(e) = manager.start_camera(camera) {
            log::error!("camera {} not started: {:#}", id, e);
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    loop {
        match rx.recv_timeout(STATUS_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let ids = manager.list();
                log::info!("{} camera(s) running: {:?}", ids.len(), ids);
                for id in ids {
                    if let Some(status) = manager.status(id) {
                        let last = status
                            .last_result
                            .map(|r| format!("{} {:.2}", r.label, r.confidence))
                            .unwrap_or_else(|| "-".to_string());
                        log::info!(
                            "camera {}: phase={:?} last={} alerts={} clips={}",
                            id,
                            status.phase,
                            last,
                            status.stats.alerts_triggered,
                            status.stats.clips_written
                        );
                    }
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping cameras...");
    manager.stop_all();
    Ok(())
}

fn build_classifier(cfg: &DaemonConfig) -> Result<SharedClassifier> {
    let threshold = cfg.alerts.confidence_threshold;
    let classifier = match cfg.classifier.backend.as_str() {
        "motion" => shared(MotionClassifier::new().with_threshold(threshold)),
        "stub" => shared(StubClassifier::constant(ClassLabel::NoViolence, 1.0)),
        "tract" => build_tract(cfg)?,
        other => return Err(anyhow!("unknown classifier backend '{}'", other)),
    };
    {
        let mut guard = classifier
            .lock()
            .map_err(|_| anyhow!("classifier lock poisoned"))?;
        guard.warm_up()?;
        log::info!("classifier '{}' ready", guard.name());
    }
    Ok(classifier)
}

#[cfg(feature = "backend-tract")]
fn build_tract(cfg: &DaemonConfig) -> Result<SharedClassifier> {
    let model_path = cfg
        .classifier
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("classifier backend 'tract' requires model_path"))?;
    let classifier = clipwatch::detect::TractClassifier::new(
        model_path,
        cfg.window.size,
        cfg.window.input_size,
    )?
    .with_threshold(cfg.alerts.confidence_threshold);
    Ok(shared(classifier))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_cfg: &DaemonConfig) -> Result<SharedClassifier> {
    Err(anyhow!(
        "classifier backend 'tract' requires building with --features backend-tract"
    ))
}
