//! vigil-capture: bounded observation sessions over an external frame source.
//!
//! The [`CaptureController`] owns the frame source for the length of a
//! session and feeds classified labels into any [`vigil_core::EmotionSink`].

pub mod probe;
pub mod replay;
pub mod session;

pub use probe::{capture_signature, ProbeError};
pub use replay::{ReplayClassifier, ReplayExtractor, ReplayScript, ReplaySource, SignatureReplay};
pub use session::{
    ActiveSubjects, CancelToken, CaptureController, CapturePolicy, SessionError, SessionReport,
    SessionState,
};
