use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::frame::NormalizedFrame;

use super::result::ClassificationResult;

/// Window classifier.
///
/// # Contract
///
/// - `classify` receives exactly one window (already padded to its fixed length).
/// - Implementations may be slow and may fail; callers downgrade failures to a
///   non-alert verdict and keep going.
/// - Implementations must not retain frames past the call.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one window of normalized frames.
    fn classify(&mut self, window: &[NormalizedFrame]) -> Result<ClassificationResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One classifier instance shared by every camera worker.
///
/// Wrapped in `Mutex` because `Classifier::classify` takes `&mut self`.
pub type SharedClassifier = Arc<Mutex<dyn Classifier>>;

/// Wrap a backend for sharing across workers.
pub fn shared<C: Classifier + 'static>(classifier: C) -> SharedClassifier {
    Arc::new(Mutex::new(classifier))
}

/// Run one window through a shared classifier.
///
/// A panicking backend is reported as an error for this window only; the
/// lock is never left poisoned for the other cameras.
pub fn classify_window(
    classifier: &SharedClassifier,
    window: &[NormalizedFrame],
) -> Result<ClassificationResult> {
    if window.is_empty() {
        return Err(anyhow!("cannot classify an empty window"));
    }
    let mut guard = classifier.lock().unwrap_or_else(PoisonError::into_inner);
    let name = guard.name();
    panic::catch_unwind(AssertUnwindSafe(|| guard.classify(window)))
        .unwrap_or_else(|_| Err(anyhow!("classifier {} panicked", name)))
}
