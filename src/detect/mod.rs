//! Window classification.
//!
//! The classifier is an opaque capability: a fixed-length window of
//! normalized frames goes in, a labelled verdict comes out. Backends live in
//! `backends`; the worker only sees the `Classifier` trait.

mod backends;
mod classifier;
mod result;

pub use backends::{MotionClassifier, StubClassifier, StubVerdict};
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use classifier::{classify_window, shared, Classifier, SharedClassifier};
pub use result::{ClassLabel, ClassificationResult, DEFAULT_CONFIDENCE_THRESHOLD};
