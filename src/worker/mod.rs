//! Per-camera ingestion loop.
//!
//! One `CameraWorker` owns one frame source, one recorder and one alert
//! controller. Each step reads a frame, records it, and adds a normalized
//! copy to the classification window; a full window is classified and the
//! verdict drives the alert state machine.
//!
//! The window and the last verdict sit behind one mutex so status readers
//! can look at them while the loop runs. Classification itself happens
//! outside that lock.

mod alert;
mod status;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::camera::CameraHandle;
use crate::detect::{classify_window, ClassificationResult, SharedClassifier};
use crate::frame::{normalize, FrameWindow, NormalizedFrame, DEFAULT_INPUT_SIZE, DEFAULT_WINDOW_SIZE};
use crate::ingest::{FrameSource, SourceFactory, SourceSettings};
use crate::recorder::{RecorderSettings, SegmentRecorder};
use crate::sink::EventSink;

pub use alert::{AlertController, AlertDecision, AlertPhase, CooldownWindow};
pub(crate) use status::{DetectionState, WorkerCounters};
pub use status::{WorkerStats, WorkerStatus};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for one worker.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Clips and temporary segments live under `output_root/cam<ID>/`.
    pub output_root: PathBuf,
    pub window_size: usize,
    pub input_size: u32,
    pub recorder: RecorderSettings,
    pub cooldown: Duration,
    /// Pause after a failed frame read.
    pub read_retry: Duration,
    pub source: SourceSettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("media"),
            window_size: DEFAULT_WINDOW_SIZE,
            input_size: DEFAULT_INPUT_SIZE,
            recorder: RecorderSettings::default(),
            cooldown: Duration::from_secs(60),
            read_retry: Duration::from_millis(100),
            source: SourceSettings::default(),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// No frame this time; back off and retry.
    ReadMiss,
    /// Frame recorded; the window is not full yet.
    Buffered { window_len: usize },
    /// Frame completed a window.
    Classified {
        result: ClassificationResult,
        decision: AlertDecision,
    },
}

pub struct CameraWorker {
    camera: CameraHandle,
    stream_url: String,
    settings: WorkerSettings,
    source: Box<dyn FrameSource>,
    recorder: SegmentRecorder,
    alerts: AlertController,
    classifier: SharedClassifier,
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<DetectionState>>,
    counters: Arc<WorkerCounters>,
}

impl CameraWorker {
    /// Resolve the camera's stream, connect to it and prepare the recorder.
    ///
    /// Fails if the source cannot be opened; nothing is left running.
    pub fn open(
        camera: CameraHandle,
        settings: WorkerSettings,
        factory: &dyn SourceFactory,
        classifier: SharedClassifier,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let stream_url = camera.stream_url();
        let mut source = factory
            .open(&stream_url, &settings.source)
            .with_context(|| format!("camera {}: open source {}", camera.id, stream_url))?;
        source
            .connect()
            .with_context(|| format!("camera {}: connect to {}", camera.id, stream_url))?;

        let recorder = SegmentRecorder::new(
            camera.id,
            &settings.output_root,
            settings.recorder.clone(),
            sink.clone(),
        )?;
        let window = FrameWindow::new(settings.window_size)?;
        let counters = WorkerCounters::default();
        counters
            .source_healthy
            .store(source.is_healthy(), Ordering::Relaxed);

        log::info!(
            "camera {}: source {} ({}) connected",
            camera.id,
            stream_url,
            camera.kind.name()
        );
        Ok(Self {
            alerts: AlertController::new(settings.cooldown),
            camera,
            stream_url,
            settings,
            source,
            recorder,
            classifier,
            sink,
            state: Arc::new(Mutex::new(DetectionState::new(window))),
            counters: Arc::new(counters),
        })
    }

    pub fn camera(&self) -> &CameraHandle {
        &self.camera
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn recorder(&self) -> &SegmentRecorder {
        &self.recorder
    }

    pub fn alerts(&self) -> &AlertController {
        &self.alerts
    }

    pub(crate) fn shared_state(&self) -> (Arc<Mutex<DetectionState>>, Arc<WorkerCounters>) {
        (self.state.clone(), self.counters.clone())
    }

    pub fn last_result(&self) -> Option<ClassificationResult> {
        self.state.lock().ok()?.last_result.clone()
    }

    pub fn status(&self) -> Option<WorkerStatus> {
        snapshot_status(self.camera.id, &self.state, &self.counters)
    }

    /// One loop iteration.
    ///
    /// Only a poisoned state lock is an error; source, recorder, classifier
    /// and sink failures are absorbed here.
    pub fn step(&mut self) -> Result<Step> {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                WorkerCounters::bump(&self.counters.read_failures);
                self.counters
                    .source_healthy
                    .store(self.source.is_healthy(), Ordering::Relaxed);
                log::debug!("camera {}: frame read failed: {:#}", self.camera.id, e);
                return Ok(Step::ReadMiss);
            }
        };
        WorkerCounters::bump(&self.counters.frames_read);
        self.counters
            .source_healthy
            .store(self.source.is_healthy(), Ordering::Relaxed);

        if self.recorder.add_frame(&frame).is_some() {
            WorkerCounters::bump(&self.counters.clips_written);
        }

        let normalized = match normalize(&frame, self.settings.input_size) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                log::warn!(
                    "camera {}: frame skipped for classification: {:#}",
                    self.camera.id,
                    e
                );
                None
            }
        };

        let batch = {
            let mut state = self.lock_state()?;
            state.recording_alert = self.recorder.is_recording_alert();
            let Some(normalized) = normalized else {
                return Ok(Step::Buffered {
                    window_len: state.window.len(),
                });
            };
            state.window.push(normalized)?;
            if !state.window.is_full() {
                return Ok(Step::Buffered {
                    window_len: state.window.len(),
                });
            }
            state.window.take_padded()
        };
        let Some(batch) = batch else {
            return Ok(Step::Buffered { window_len: 0 });
        };

        let result = self.classify(&batch);
        let now = Instant::now();
        let decision = self.alerts.evaluate(&result, now);
        match decision {
            AlertDecision::Trigger => self.trigger(&result, now),
            AlertDecision::Suppress => {
                WorkerCounters::bump(&self.counters.alerts_suppressed);
                log::debug!(
                    "camera {}: {} ({:.2}) suppressed by cooldown",
                    self.camera.id,
                    result.label,
                    result.confidence
                );
            }
            AlertDecision::Ignore => {}
        }

        let mut state = self.lock_state()?;
        state.last_result = Some(result.clone());
        state.phase = self.alerts.phase();
        state.recording_alert = self.recorder.is_recording_alert();
        Ok(Step::Classified { result, decision })
    }

    /// Loop until `cancel` is set or an unexpected error occurs, then drain.
    pub fn run(mut self, cancel: Arc<AtomicBool>) {
        log::info!("camera {}: worker running", self.camera.id);
        let mut last_health_log = Instant::now();

        while !cancel.load(Ordering::SeqCst) {
            match self.step() {
                Ok(Step::ReadMiss) => std::thread::sleep(self.settings.read_retry),
                Ok(_) => {}
                Err(e) => {
                    log::error!("camera {}: worker aborted: {:#}", self.camera.id, e);
                    break;
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }
        }

        self.drain();
        log::info!("camera {}: worker stopped", self.camera.id);
    }

    /// Final padded classification pass and recorder flush.
    ///
    /// The final verdict only updates the last result; it never triggers.
    pub fn drain(&mut self) {
        let batch = match self.lock_state() {
            Ok(mut state) => state.window.take_padded(),
            Err(e) => {
                log::warn!("camera {}: {:#}", self.camera.id, e);
                None
            }
        };
        if let Some(batch) = batch {
            let result = self.classify(&batch);
            if let Ok(mut state) = self.lock_state() {
                state.last_result = Some(result);
            }
        }

        if self.recorder.shutdown().is_some() {
            WorkerCounters::bump(&self.counters.clips_written);
        }
        self.counters.source_healthy.store(false, Ordering::Relaxed);
        if let Ok(mut state) = self.lock_state() {
            state.recording_alert = false;
        }
    }

    fn classify(&self, batch: &[NormalizedFrame]) -> ClassificationResult {
        WorkerCounters::bump(&self.counters.windows_classified);
        match classify_window(&self.classifier, batch) {
            Ok(result) => result,
            Err(e) => {
                WorkerCounters::bump(&self.counters.classify_failures);
                log::warn!(
                    "camera {}: classification failed, treating window as non-alert: {:#}",
                    self.camera.id,
                    e
                );
                ClassificationResult::non_alert()
            }
        }
    }

    fn trigger(&mut self, result: &ClassificationResult, now: Instant) {
        let detection_id = match self.sink.record_detection(
            self.camera.id,
            result.label,
            self.camera.zone.as_deref(),
        ) {
            Ok(id) => id,
            Err(e) => {
                log::warn!(
                    "camera {}: failed to record {} detection, alert dropped: {:#}",
                    self.camera.id,
                    result.label,
                    e
                );
                self.alerts.abort_trigger();
                return;
            }
        };

        if result.is_critical {
            log::error!(
                "camera {}: CRITICAL {} detected ({:.1}%), detection {}",
                self.camera.id,
                result.label,
                result.confidence * 100.0,
                detection_id.0
            );
        } else {
            log::warn!(
                "camera {}: {} detected ({:.1}%), detection {}",
                self.camera.id,
                result.label,
                result.confidence * 100.0,
                detection_id.0
            );
        }

        if !self
            .recorder
            .trigger_alert(result.label, result.confidence, detection_id)
        {
            log::warn!(
                "camera {}: detection {} recorded without a clip",
                self.camera.id,
                detection_id.0
            );
        }
        self.alerts.confirm_trigger(now);
        WorkerCounters::bump(&self.counters.alerts_triggered);
    }

    fn log_health(&self) {
        let stats = self.counters.snapshot();
        let source = self.source.stats();
        log::info!(
            "camera {}: health={} frames={} windows={} alerts={} suppressed={} clips={} source={}",
            self.camera.id,
            self.source.is_healthy(),
            source.frames_captured,
            stats.windows_classified,
            stats.alerts_triggered,
            stats.alerts_suppressed,
            stats.clips_written,
            source.locator
        );
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, DetectionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("camera {}: detection state lock poisoned", self.camera.id))
    }
}

pub(crate) fn snapshot_status(
    camera_id: crate::camera::CameraId,
    state: &Mutex<DetectionState>,
    counters: &WorkerCounters,
) -> Option<WorkerStatus> {
    let state = state.lock().ok()?;
    Some(WorkerStatus {
        camera_id,
        last_result: state.last_result.clone(),
        window_len: state.window.len(),
        phase: state.phase,
        recording_alert: state.recording_alert,
        source_healthy: counters.source_healthy.load(Ordering::Relaxed),
        stats: counters.snapshot(),
    })
}
