//! Trend classification over a subject's ordered emotion history.
//!
//! The verdict depends only on the share of negative labels; severity
//! weights are carried for the rationale plot and never feed the decision.

use crate::emotion::EmotionLabel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Classification outcome for one subject's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    ConfirmedSuspect,
    InnocentCivilian,
    /// No records yet; not an error.
    InsufficientData,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::ConfirmedSuspect => "Confirmed suspect",
            Verdict::InnocentCivilian => "Innocent civilian",
            Verdict::InsufficientData => "Insufficient data",
        })
    }
}

/// One (timestamp, label) pair of the supporting sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendSample {
    pub timestamp: DateTime<Utc>,
    pub label: EmotionLabel,
}

/// A point on the severity-over-time plot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    /// Seconds since the first sample.
    pub offset_secs: f64,
    pub severity: u8,
    pub label: EmotionLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub subject_id: String,
    pub verdict: Verdict,
    pub negative_count: usize,
    pub total: usize,
    /// Every sample the verdict was computed from, oldest first.
    pub sequence: Vec<TrendSample>,
}

impl TrendReport {
    /// Negative share in [0, 1]; `None` when there is no data.
    pub fn negative_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.negative_count as f64 / self.total as f64)
    }

    /// Severity-over-time series for the rationale view.
    pub fn points(&self) -> Vec<TrendPoint> {
        let Some(first) = self.sequence.first() else {
            return Vec::new();
        };
        self.sequence
            .iter()
            .map(|s| TrendPoint {
                offset_secs: (s.timestamp - first.timestamp)
                    .num_microseconds()
                    .map_or(0.0, |us| us as f64 / 1e6),
                severity: s.label.severity(),
                label: s.label,
            })
            .collect()
    }
}

/// Read side of the emotion log, as consumed by [`evaluate`].
pub trait EmotionHistory {
    type Error;

    /// Timestamp-ascending samples for `subject_id`; empty when there are none.
    fn query(&self, subject_id: &str) -> Result<Vec<TrendSample>, Self::Error>;
}

/// Reduce an ordered sequence to a verdict.
///
/// `ConfirmedSuspect` iff strictly more than half of the samples are
/// negative; exactly half is `InnocentCivilian`. Integer arithmetic keeps
/// the boundary exact.
pub fn classify(subject_id: &str, sequence: Vec<TrendSample>) -> TrendReport {
    let total = sequence.len();
    let negative_count = sequence.iter().filter(|s| s.label.is_negative()).count();

    let verdict = if total == 0 {
        Verdict::InsufficientData
    } else if negative_count * 2 > total {
        Verdict::ConfirmedSuspect
    } else {
        Verdict::InnocentCivilian
    };

    TrendReport {
        subject_id: subject_id.to_string(),
        verdict,
        negative_count,
        total,
        sequence,
    }
}

/// Query `history` for `subject_id` and classify the result.
pub fn evaluate<H: EmotionHistory>(history: &H, subject_id: &str) -> Result<TrendReport, H::Error> {
    let sequence = history.query(subject_id)?;
    let report = classify(subject_id, sequence);
    tracing::debug!(
        subject = subject_id,
        verdict = ?report.verdict,
        negative = report.negative_count,
        total = report.total,
        "trend evaluated"
    );
    Ok(report)
}
