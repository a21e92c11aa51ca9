//! Scripted frame source, classifier and signature extractor.
//!
//! A replay script lists one classifier outcome per frame:
//!
//! ```text
//! # comments and blank lines are ignored
//! angry
//! neutral
//! -        # no face in this frame
//! ```
//!
//! It stands in for a camera and a model when driving a capture session
//! from the command line or from tests.

use std::sync::Arc;
use std::time::{Duration, Instant};
use vigil_core::source::{ClassifierError, ExtractorError, SourceError};
use vigil_core::{
    EmotionClassifier, EmotionLabel, Frame, FramePoll, FrameSource, LabelError, Signature,
    SignatureExtractor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayScript {
    steps: Vec<Option<EmotionLabel>>,
}

impl ReplayScript {
    pub fn new(steps: Vec<Option<EmotionLabel>>) -> Self {
        Self { steps }
    }

    pub fn parse(text: &str) -> Result<Self, LabelError> {
        let mut steps = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            match line {
                "" => continue,
                "-" | "none" => steps.push(None),
                label => steps.push(Some(label.parse()?)),
            }
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Split into a source that emits one frame per step, `interval` apart,
    /// and a classifier that answers with the step for each frame.
    pub fn into_parts(self, interval: Duration) -> (ReplaySource, ReplayClassifier) {
        let steps: Arc<[Option<EmotionLabel>]> = self.steps.into();
        let source = ReplaySource::new(steps.len(), interval);
        (source, ReplayClassifier { steps })
    }
}

/// Recorded extractor outputs, one per frame (`None` for no face).
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureReplay {
    frames: Vec<Option<Signature>>,
}

impl SignatureReplay {
    pub fn new(frames: Vec<Option<Signature>>) -> Self {
        Self { frames }
    }

    pub fn into_parts(self, interval: Duration) -> (ReplaySource, ReplayExtractor) {
        let frames: Arc<[Option<Signature>]> = self.frames.into();
        let source = ReplaySource::new(frames.len(), interval);
        (source, ReplayExtractor { frames })
    }
}

pub struct ReplaySource {
    total: u32,
    next: u32,
    interval: Duration,
    /// When the next frame becomes available; kept across `Pending` polls.
    due: Option<Instant>,
    released: bool,
}

impl ReplaySource {
    fn new(total: usize, interval: Duration) -> Self {
        Self {
            total: total as u32,
            next: 0,
            interval,
            due: None,
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, SourceError> {
        if self.released {
            return Err(SourceError::Unavailable("replay source released".into()));
        }
        if self.next >= self.total {
            return Ok(FramePoll::EndOfStream);
        }
        let interval = self.interval;
        let due = *self.due.get_or_insert_with(|| Instant::now() + interval);
        let wait = due.saturating_duration_since(Instant::now());
        if wait > timeout {
            std::thread::sleep(timeout);
            return Ok(FramePoll::Pending);
        }
        std::thread::sleep(wait);
        self.due = None;
        let frame = Frame::new(vec![0], 1, 1, self.next);
        self.next += 1;
        Ok(FramePoll::Frame(frame))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

pub struct ReplayClassifier {
    steps: Arc<[Option<EmotionLabel>]>,
}

impl EmotionClassifier for ReplayClassifier {
    fn classify(&mut self, frame: &Frame) -> Result<Option<EmotionLabel>, ClassifierError> {
        self.steps
            .get(frame.sequence as usize)
            .copied()
            .ok_or_else(|| {
                ClassifierError::InferenceFailed(format!("frame {} is not in the script", frame.sequence))
            })
    }
}

pub struct ReplayExtractor {
    frames: Arc<[Option<Signature>]>,
}

impl SignatureExtractor for ReplayExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Signature>, ExtractorError> {
        self.frames
            .get(frame.sequence as usize)
            .cloned()
            .ok_or_else(|| {
                ExtractorError::InferenceFailed(format!("frame {} is not in the recording", frame.sequence))
            })
    }
}
