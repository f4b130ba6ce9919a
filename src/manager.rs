//! Registry of running camera workers.
//!
//! At most one worker per camera id. Each worker runs on its own named
//! thread; a failure in one never reaches its siblings. The registry lock
//! is never held while a source is being opened or a live worker joined.
//!
//! A worker that outlives its stop timeout stays in the registry as
//! stopping. Its id cannot be started again until the thread has exited,
//! because the old worker still owns the camera's segment directory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::camera::{CameraHandle, CameraId, CameraKind};
use crate::detect::{ClassificationResult, SharedClassifier};
use crate::ingest::{DefaultSourceFactory, SourceFactory};
use crate::sink::EventSink;
use crate::worker::{
    snapshot_status, CameraWorker, DetectionState, WorkerCounters, WorkerSettings, WorkerStatus,
};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerEntry {
    camera: CameraHandle,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<DetectionState>>,
    counters: Arc<WorkerCounters>,
    /// Disconnects when the worker thread exits.
    done_rx: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

/// A worker that was told to stop but had not exited by the timeout.
struct Detached {
    done_rx: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

impl Detached {
    fn has_exited(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[derive(Default)]
struct Registry {
    running: HashMap<CameraId, WorkerEntry>,
    /// Ids whose source is being opened.
    starting: HashSet<CameraId>,
    /// Ids told to stop whose worker is still within the stop timeout.
    draining: HashSet<CameraId>,
    /// Ids whose worker outlived the stop timeout.
    stopping: HashMap<CameraId, Detached>,
}

impl Registry {
    /// Remove detached workers whose threads have exited.
    fn reap_stopping(&mut self) -> Vec<(CameraId, Detached)> {
        let exited: Vec<CameraId> = self
            .stopping
            .iter()
            .filter(|(_, detached)| detached.has_exited())
            .map(|(id, _)| *id)
            .collect();
        exited
            .into_iter()
            .filter_map(|id| self.stopping.remove(&id).map(|detached| (id, detached)))
            .collect()
    }
}

pub struct CameraManager {
    settings: WorkerSettings,
    classifier: SharedClassifier,
    sink: Arc<dyn EventSink>,
    factory: Arc<dyn SourceFactory>,
    stop_timeout: Duration,
    registry: Mutex<Registry>,
}

impl CameraManager {
    /// Manager whose workers share one classifier and one sink.
    pub fn new(
        settings: WorkerSettings,
        classifier: SharedClassifier,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            classifier,
            sink,
            factory: Arc::new(DefaultSourceFactory),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn with_source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Upper bound on how long `stop` waits for a worker to drain.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start a worker for `camera_id` unless one is already registered.
    pub fn start(&self, camera_id: CameraId, kind: CameraKind, locator: &str) -> Result<()> {
        self.start_camera(CameraHandle::new(camera_id, kind, locator))
    }

    /// Start a worker for a fully described camera.
    ///
    /// Idempotent per id. If the source cannot be opened the error is
    /// returned and nothing is registered; there is no automatic retry.
    /// Fails while a previous worker for the same id is still shutting down.
    pub fn start_camera(&self, camera: CameraHandle) -> Result<()> {
        let id = camera.id;
        let exited = {
            let mut registry = self.lock()?;
            if registry.running.contains_key(&id) || registry.starting.contains(&id) {
                log::debug!("camera {}: already running", id);
                return Ok(());
            }
            let exited = registry.reap_stopping();
            if registry.draining.contains(&id) || registry.stopping.contains_key(&id) {
                return Err(anyhow!(
                    "camera {}: previous worker is still shutting down",
                    id
                ));
            }
            registry.starting.insert(id);
            exited
        };
        join_exited(exited);

        let opened = CameraWorker::open(
            camera.clone(),
            self.settings.clone(),
            self.factory.as_ref(),
            self.classifier.clone(),
            self.sink.clone(),
        );
        let spawned = opened.and_then(spawn_worker);

        let mut registry = self.lock()?;
        registry.starting.remove(&id);
        match spawned {
            Ok((cancel, state, counters, done_rx, join)) => {
                registry.running.insert(
                    id,
                    WorkerEntry {
                        camera,
                        cancel,
                        state,
                        counters,
                        done_rx,
                        join,
                    },
                );
                log::info!("camera {}: started", id);
                Ok(())
            }
            Err(e) => {
                log::error!("camera {}: failed to start: {:#}", id, e);
                Err(e)
            }
        }
    }

    /// Stop and unregister a worker. Returns false if none was registered.
    ///
    /// Waits up to the stop timeout for the worker to finish its drain; after
    /// that the thread is detached with a warning and releases its own
    /// resources when it exits.
    pub fn stop(&self, camera_id: CameraId) -> Result<bool> {
        let entry = {
            let mut registry = self.lock()?;
            let entry = registry.running.remove(&camera_id);
            if entry.is_some() {
                registry.draining.insert(camera_id);
            }
            entry
        };
        let Some(entry) = entry else {
            return Ok(false);
        };
        entry.cancel.store(true, Ordering::SeqCst);
        self.finish(entry);
        Ok(true)
    }

    /// True while a stopped worker for `camera_id` has not exited yet.
    pub fn is_stopping(&self, camera_id: CameraId) -> bool {
        let exited = match self.registry.lock() {
            Ok(mut registry) => registry.reap_stopping(),
            Err(_) => return false,
        };
        join_exited(exited);
        self.registry
            .lock()
            .map(|registry| {
                registry.draining.contains(&camera_id)
                    || registry.stopping.contains_key(&camera_id)
            })
            .unwrap_or(false)
    }

    /// Stop every worker. Cancellation is signalled to all before waiting.
    pub fn stop_all(&self) {
        let entries: Vec<WorkerEntry> = match self.registry.lock() {
            Ok(mut registry) => {
                let entries: Vec<WorkerEntry> =
                    registry.running.drain().map(|(_, entry)| entry).collect();
                let ids: Vec<CameraId> = entries.iter().map(|entry| entry.camera.id).collect();
                registry.draining.extend(ids);
                entries
            }
            Err(_) => {
                log::error!("camera registry lock poisoned; workers left running");
                return;
            }
        };
        for entry in &entries {
            entry.cancel.store(true, Ordering::SeqCst);
        }
        for entry in entries {
            self.finish(entry);
        }
    }

    /// Registered camera ids, sorted. Workers that already exited are
    /// removed first.
    pub fn list(&self) -> Vec<CameraId> {
        let (ids, exited, reaped) = match self.registry.lock() {
            Ok(mut registry) => {
                let finished: Vec<CameraId> = registry
                    .running
                    .iter()
                    .filter(|(_, entry)| entry.join.is_finished())
                    .map(|(id, _)| *id)
                    .collect();
                let exited: Vec<WorkerEntry> = finished
                    .iter()
                    .filter_map(|id| registry.running.remove(id))
                    .collect();
                let mut ids: Vec<CameraId> = registry.running.keys().copied().collect();
                ids.sort_unstable();
                (ids, exited, registry.reap_stopping())
            }
            Err(_) => return Vec::new(),
        };
        for entry in exited {
            log::warn!(
                "camera {}: worker exited on its own; unregistered",
                entry.camera.id
            );
            self.finish(entry);
        }
        join_exited(reaped);
        ids
    }

    pub fn is_running(&self, camera_id: CameraId) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.running.contains_key(&camera_id))
            .unwrap_or(false)
    }

    /// Most recent verdict for a camera.
    pub fn last_result(&self, camera_id: CameraId) -> Option<ClassificationResult> {
        let registry = self.registry.lock().ok()?;
        let entry = registry.running.get(&camera_id)?;
        let state = entry.state.lock().ok()?;
        state.last_result.clone()
    }

    pub fn status(&self, camera_id: CameraId) -> Option<WorkerStatus> {
        let registry = self.registry.lock().ok()?;
        let entry = registry.running.get(&camera_id)?;
        snapshot_status(camera_id, &entry.state, &entry.counters)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| anyhow!("camera registry lock poisoned"))
    }

    fn finish(&self, entry: WorkerEntry) {
        let id = entry.camera.id;
        let detached = match entry.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if entry.join.join().is_err() {
                    log::error!("camera {}: worker panicked", id);
                } else {
                    log::info!("camera {}: stopped", id);
                }
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "camera {}: worker did not stop within {:?}; detaching",
                    id,
                    self.stop_timeout
                );
                Some(Detached {
                    done_rx: entry.done_rx,
                    join: entry.join,
                })
            }
        };
        match self.registry.lock() {
            Ok(mut registry) => {
                registry.draining.remove(&id);
                if let Some(detached) = detached {
                    registry.stopping.insert(id, detached);
                }
            }
            Err(_) => log::error!("camera {}: registry lock poisoned", id),
        }
    }
}

/// Join workers that already signalled exit.
fn join_exited(exited: Vec<(CameraId, Detached)>) {
    for (id, detached) in exited {
        if detached.join.join().is_err() {
            log::error!("camera {}: worker panicked", id);
        } else {
            log::info!("camera {}: detached worker exited", id);
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

type Spawned = (
    Arc<AtomicBool>,
    Arc<Mutex<DetectionState>>,
    Arc<WorkerCounters>,
    mpsc::Receiver<()>,
    JoinHandle<()>,
);

fn spawn_worker(worker: CameraWorker) -> Result<Spawned> {
    let id = worker.camera().id;
    let cancel = Arc::new(AtomicBool::new(false));
    let (state, counters) = worker.shared_state();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let thread_cancel = cancel.clone();
    let join = thread::Builder::new()
        .name(format!("camera-{}", id))
        .spawn(move || {
            let _done = done_tx;
            worker.run(thread_cancel);
        })
        .with_context(|| format!("camera {}: spawn worker thread", id))?;
    Ok((cancel, state, counters, done_rx, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{shared, StubClassifier};
    use crate::sink::InMemoryEventSink;

    fn manager(root: &std::path::Path) -> CameraManager {
        let settings = WorkerSettings {
            output_root: root.to_path_buf(),
            window_size: 2,
            input_size: 8,
            ..WorkerSettings::default()
        };
        CameraManager::new(
            settings,
            shared(StubClassifier::default()),
            Arc::new(InMemoryEventSink::new()),
        )
    }

    #[test]
    fn synthetic_camera_lifecycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = manager(dir.path());

        manager.start(1, CameraKind::passthrough(), "stub://lobby")?;
        manager.start(1, CameraKind::passthrough(), "stub://lobby")?;
        assert_eq!(manager.list(), vec![1]);

        assert!(manager.stop(1)?);
        assert!(!manager.stop(1)?);
        assert!(manager.list().is_empty());
        Ok(())
    }

    #[test]
    fn unsupported_stream_is_not_registered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = manager(dir.path());

        assert!(manager
            .start(2, CameraKind::passthrough(), "ftp://camera/stream")
            .is_err());
        assert!(manager.list().is_empty());
        assert!(manager.last_result(2).is_none());
        Ok(())
    }
}
