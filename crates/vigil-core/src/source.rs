//! Collaborator seams: the frame source, the emotion classifier and the
//! signature extractor are external and reached only through these traits.

use crate::emotion::EmotionLabel;
use crate::frame::{FaceRegion, Frame};
use crate::types::Signature;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Label(#[from] crate::emotion::LabelError),
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Signature(#[from] crate::types::SignatureError),
}

/// Result of one bounded wait on a frame source.
pub enum FramePoll {
    Frame(Frame),
    /// No frame arrived within the timeout.
    Pending,
    EndOfStream,
}

/// Source of frames, typically a singleton camera device.
pub trait FrameSource: Send {
    /// Wait at most `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, SourceError>;

    /// Give the underlying device back. Called exactly once per session.
    fn release(&mut self);
}

/// Opaque emotion inference: `Ok(None)` when no face is found in the frame.
pub trait EmotionClassifier: Send {
    fn classify(&mut self, frame: &Frame) -> Result<Option<EmotionLabel>, ClassifierError>;
}

/// Opaque face feature extraction: `Ok(None)` when no face is found in the frame.
pub trait SignatureExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Signature>, ExtractorError>;
}

/// Face locator plus a seven-class emotion head over 48x48 patches.
pub trait EmotionModel: Send {
    /// `Ok(None)` when the frame holds no face.
    fn locate(&mut self, frame: &Frame) -> Result<Option<FaceRegion>, ClassifierError>;

    /// Raw class scores in the model's output order.
    fn scores(&mut self, patch: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

/// Adapts an [`EmotionModel`] to [`EmotionClassifier`]: locate, crop to a
/// normalized patch, take the arg-max class.
pub struct PatchClassifier<M> {
    model: M,
}

impl<M: EmotionModel> PatchClassifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: EmotionModel> EmotionClassifier for PatchClassifier<M> {
    fn classify(&mut self, frame: &Frame) -> Result<Option<EmotionLabel>, ClassifierError> {
        let Some(region) = self.model.locate(frame)? else {
            return Ok(None);
        };
        let patch = frame.emotion_patch(region).ok_or_else(|| {
            ClassifierError::InferenceFailed(format!("face region {region:?} outside frame"))
        })?;
        let scores = self.model.scores(&patch)?;
        let index = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| ClassifierError::InferenceFailed("model returned no scores".into()))?;
        Ok(Some(EmotionLabel::from_class_index(index)?))
    }
}
