//! Emotion labels, timestamped records and the append-side seam used by capture.

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("invalid emotion label: {0:?}")]
    InvalidLabel(String),
    #[error("classifier output index {0} is outside the label set")]
    InvalidIndex(usize),
}

/// Closed set of affect labels produced by the external emotion classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Sad,
    Surprise,
    Happy,
    Neutral,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
    ];

    /// Output order of FER-2013 style seven-class classifiers
    /// (angry, disgust, fear, happy, sad, surprise, neutral).
    const CLASS_ORDER: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Map an argmax index from a seven-class classifier head to a label.
    pub fn from_class_index(index: usize) -> Result<Self, LabelError> {
        Self::CLASS_ORDER
            .get(index)
            .copied()
            .ok_or(LabelError::InvalidIndex(index))
    }

    /// Severity weight on the trend plot's vertical axis.
    pub fn severity(self) -> u8 {
        match self {
            EmotionLabel::Angry | EmotionLabel::Sad => 4,
            EmotionLabel::Disgust => 3,
            EmotionLabel::Fear | EmotionLabel::Surprise => 2,
            EmotionLabel::Happy => 1,
            EmotionLabel::Neutral => 0,
        }
    }

    /// Whether the label counts toward the negative share in trend classification.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            EmotionLabel::Angry | EmotionLabel::Disgust | EmotionLabel::Fear | EmotionLabel::Sad
        )
    }

    /// Canonical stored form.
    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| LabelError::InvalidLabel(s.to_string()))
    }
}

impl TryFrom<String> for EmotionLabel {
    type Error = LabelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EmotionLabel> for String {
    fn from(label: EmotionLabel) -> Self {
        label.as_str().to_string()
    }
}

/// One observation: a subject showed `label` at `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionRecord {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: EmotionLabel,
    /// Capture session that produced the record; `None` for manual entries.
    pub session_id: Option<SessionId>,
}

impl EmotionRecord {
    pub fn new(subject_id: impl Into<String>, timestamp: DateTime<Utc>, label: EmotionLabel) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
            label,
            session_id: None,
        }
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Destination for records produced by a capture session.
pub trait EmotionSink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn append(&self, record: &EmotionRecord) -> Result<(), Self::Error>;
}
