//! vigil-core: subject signatures, gallery matching, emotion labels and
//! trend classification.
//!
//! Everything here is storage- and device-agnostic; persistence lives in
//! `vigil-store`, session orchestration in `vigil-capture`.

pub mod emotion;
pub mod frame;
pub mod matcher;
pub mod source;
pub mod trend;
pub mod types;

pub use emotion::{EmotionLabel, EmotionRecord, EmotionSink, LabelError};
pub use frame::{FaceRegion, Frame};
pub use matcher::{EuclideanMatcher, Identification, Matcher};
pub use source::{EmotionClassifier, EmotionModel, FramePoll, FrameSource, PatchClassifier, SignatureExtractor};
pub use trend::{EmotionHistory, TrendReport, TrendSample, Verdict};
pub use types::{GalleryEntry, SessionId, Signature, SignatureError, Subject};
