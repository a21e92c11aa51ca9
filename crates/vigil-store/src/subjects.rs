//! Subject roster and the in-memory signature gallery.

use crate::{Database, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use std::sync::{Arc, RwLock};
use vigil_core::{GalleryEntry, Identification, Matcher, Signature, Subject};

/// Raw `subjects` row before signature and timestamp validation.
struct SubjectRow {
    subject_key: String,
    name: String,
    age: u32,
    crime: String,
    signature: Option<Vec<u8>>,
    enrolled_at: i64,
}

impl SubjectRow {
    const COLUMNS: &'static str = "subject_key, name, age, crime, signature, enrolled_at";

    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            subject_key: r.get(0)?,
            name: r.get(1)?,
            age: r.get(2)?,
            crime: r.get(3)?,
            signature: r.get(4)?,
            enrolled_at: r.get(5)?,
        })
    }

    fn into_subject(self, dim: usize) -> Result<Subject, StoreError> {
        let signature = self
            .signature
            .as_deref()
            .map(|blob| decode_signature(blob, dim))
            .transpose()?;
        let enrolled_at = DateTime::<Utc>::from_timestamp_micros(self.enrolled_at)
            .ok_or(StoreError::InvalidTimestamp(self.enrolled_at))?;
        Ok(Subject {
            id: self.subject_key,
            name: self.name,
            age: self.age,
            crime: self.crime,
            signature,
            enrolled_at,
        })
    }
}

fn decode_signature(blob: &[u8], dim: usize) -> Result<Signature, StoreError> {
    let signature = Signature::from_bytes(blob)?;
    signature.ensure_dim(dim)?;
    Ok(signature)
}

/// Subject roster with a lock-guarded gallery of enrolled signatures.
///
/// The gallery is loaded once at [`open`](Self::open) and kept in step with
/// every enroll/remove. Lookups share the read lock; mutations hold the
/// write lock across the database write so no lookup ever sees a
/// half-applied change.
pub struct SignatureStore {
    db: Arc<Database>,
    dim: usize,
    gallery: RwLock<Vec<GalleryEntry>>,
}

impl SignatureStore {
    /// Load every signed subject, in enrollment order.
    ///
    /// Fails with `InvalidSignature` if any stored blob is corrupt or has a
    /// dimensionality other than `dim`.
    pub fn open(db: Arc<Database>, dim: usize) -> Result<Self, StoreError> {
        let gallery = db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_key, signature FROM subjects
                 WHERE signature IS NOT NULL ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(subject_id, blob)| -> Result<GalleryEntry, StoreError> {
                    let signature = decode_signature(&blob, dim).map_err(|e| {
                        tracing::error!(subject = %subject_id, error = %e, "corrupt stored signature");
                        e
                    })?;
                    Ok(GalleryEntry {
                        subject_id,
                        signature,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })?;

        tracing::info!(signatures = gallery.len(), dim, "signature gallery loaded");

        Ok(Self {
            db,
            dim,
            gallery: RwLock::new(gallery),
        })
    }

    /// Signature dimensionality this store accepts.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert a new subject. An existing subject key is never overwritten.
    pub fn enroll(&self, subject: &Subject) -> Result<(), StoreError> {
        if let Some(sig) = &subject.signature {
            sig.ensure_dim(self.dim)?;
        }

        let mut gallery = self.gallery.write().map_err(|_| StoreError::Poisoned)?;

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO subjects (name, age, crime, subject_key, signature, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    subject.name,
                    subject.age,
                    subject.crime,
                    subject.id,
                    subject.signature.as_ref().map(Signature::to_bytes),
                    subject.enrolled_at.timestamp_micros(),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::Duplicate(subject.id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        if let Some(sig) = &subject.signature {
            gallery.push(GalleryEntry {
                subject_id: subject.id.clone(),
                signature: sig.clone(),
            });
        }

        tracing::info!(
            subject = %subject.id,
            signed = subject.signature.is_some(),
            "subject enrolled"
        );
        Ok(())
    }

    /// Remove a subject and, by cascade, its emotion records.
    pub fn remove(&self, subject_id: &str) -> Result<(), StoreError> {
        let mut gallery = self.gallery.write().map_err(|_| StoreError::Poisoned)?;

        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM subjects WHERE subject_key = ?1",
                params![subject_id],
            )?)
        })?;
        if deleted == 0 {
            return Err(StoreError::NotFound(subject_id.to_string()));
        }

        gallery.retain(|e| e.subject_id != subject_id);
        tracing::info!(subject = subject_id, "subject removed");
        Ok(())
    }

    /// Every signed subject, in enrollment order. Unsigned subjects are not matchable.
    pub fn all(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        Ok(self
            .gallery
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .clone())
    }

    /// Resolve `probe` against the gallery with `matcher`.
    ///
    /// A probe of the wrong dimensionality is rejected even when the gallery is empty.
    pub fn identify<M: Matcher + ?Sized>(
        &self,
        matcher: &M,
        probe: &Signature,
    ) -> Result<Identification, StoreError> {
        probe.ensure_dim(self.dim)?;
        let gallery = self.gallery.read().map_err(|_| StoreError::Poisoned)?;
        Ok(matcher.identify(probe, &gallery)?)
    }

    pub fn get(&self, subject_id: &str) -> Result<Subject, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM subjects WHERE subject_key = ?1", SubjectRow::COLUMNS),
                    params![subject_id],
                    SubjectRow::from_row,
                )
                .optional()?)
        })?;
        row.ok_or_else(|| StoreError::NotFound(subject_id.to_string()))?
            .into_subject(self.dim)
    }

    /// All subjects, signed or not, in enrollment order.
    pub fn subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subjects ORDER BY id",
                SubjectRow::COLUMNS
            ))?;
            let rows = stmt
                .query_map([], SubjectRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(|r| r.into_subject(self.dim)).collect()
    }
}
