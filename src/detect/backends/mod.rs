pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionClassifier;
pub use stub::{StubClassifier, StubVerdict};

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
