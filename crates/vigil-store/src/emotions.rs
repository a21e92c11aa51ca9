//! Append-only emotion log.

use crate::{Database, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use vigil_core::trend::{self, EmotionHistory};
use vigil_core::{EmotionLabel, EmotionRecord, EmotionSink, SessionId, TrendReport, TrendSample};

fn timestamp_from_us(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(us).ok_or(StoreError::InvalidTimestamp(us))
}

/// Timestamp-ordered record of emotion observations per subject.
#[derive(Clone)]
pub struct EmotionLog {
    db: Arc<Database>,
}

impl EmotionLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one record.
    ///
    /// Within a session, a timestamp earlier than the session's latest record
    /// for the same subject is rejected with `OutOfOrder`. Records from
    /// different sessions, or without a session, are never compared.
    pub fn append(&self, record: &EmotionRecord) -> Result<(), StoreError> {
        let ts_us = record.timestamp.timestamp_micros();
        let session = record.session_id.map(|s| s.to_string());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;

            let known = tx
                .query_row(
                    "SELECT 1 FROM subjects WHERE subject_key = ?1",
                    params![record.subject_id],
                    |_| Ok(()),
                )
                .optional()?;
            if known.is_none() {
                return Err(StoreError::NotFound(record.subject_id.clone()));
            }

            if let Some(session) = &session {
                let last: Option<i64> = tx.query_row(
                    "SELECT MAX(ts_us) FROM emotion_records
                     WHERE subject_key = ?1 AND session_id = ?2",
                    params![record.subject_id, session],
                    |r| r.get(0),
                )?;
                if let Some(last_us) = last.filter(|&last_us| ts_us < last_us) {
                    return Err(StoreError::OutOfOrder {
                        subject: record.subject_id.clone(),
                        session: session.clone(),
                        last_us,
                        attempted_us: ts_us,
                    });
                }
            }

            tx.execute(
                "INSERT INTO emotion_records (subject_key, ts_us, emotion, session_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.subject_id, ts_us, record.label.as_str(), session],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!(
            subject = %record.subject_id,
            label = %record.label,
            session = ?record.session_id,
            "emotion recorded"
        );
        Ok(())
    }

    /// Append a record whose label arrives as text (operator entry, imports).
    pub fn append_text(
        &self,
        subject_id: &str,
        timestamp: DateTime<Utc>,
        label: &str,
        session_id: Option<SessionId>,
    ) -> Result<(), StoreError> {
        let label: EmotionLabel = label.parse()?;
        self.append(&EmotionRecord {
            subject_id: subject_id.to_string(),
            timestamp,
            label,
            session_id,
        })
    }

    /// Full records for `subject_id`, timestamp-ascending with insertion order breaking ties.
    pub fn records(&self, subject_id: &str) -> Result<Vec<EmotionRecord>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ts_us, emotion, session_id FROM emotion_records
                 WHERE subject_key = ?1 ORDER BY ts_us, id",
            )?;
            let rows = stmt
                .query_map(params![subject_id], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(ts_us, emotion, session)| -> Result<EmotionRecord, StoreError> {
                let session_id = match session {
                    Some(s) => Some(
                        s.parse::<SessionId>()
                            .map_err(|_| StoreError::InvalidSessionId(s.clone()))?,
                    ),
                    None => None,
                };
                Ok(EmotionRecord {
                    subject_id: subject_id.to_string(),
                    timestamp: timestamp_from_us(ts_us)?,
                    label: emotion.parse()?,
                    session_id,
                })
            })
            .collect()
    }

    /// `(timestamp, label)` pairs for `subject_id`, oldest first; empty when none.
    pub fn query(&self, subject_id: &str) -> Result<Vec<TrendSample>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ts_us, emotion FROM emotion_records
                 WHERE subject_key = ?1 ORDER BY ts_us, id",
            )?;
            let rows = stmt
                .query_map(params![subject_id], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(ts_us, emotion)| -> Result<TrendSample, StoreError> {
                Ok(TrendSample {
                    timestamp: timestamp_from_us(ts_us)?,
                    label: emotion.parse()?,
                })
            })
            .collect()
    }

    /// Classify the subject's current history.
    pub fn evaluate(&self, subject_id: &str) -> Result<TrendReport, StoreError> {
        trend::evaluate(self, subject_id)
    }
}

impl EmotionHistory for EmotionLog {
    type Error = StoreError;

    fn query(&self, subject_id: &str) -> Result<Vec<TrendSample>, StoreError> {
        EmotionLog::query(self, subject_id)
    }
}

impl EmotionSink for EmotionLog {
    type Error = StoreError;

    fn append(&self, record: &EmotionRecord) -> Result<(), StoreError> {
        EmotionLog::append(self, record)
    }
}
