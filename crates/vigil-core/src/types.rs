use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Bytes used by the dimensionality header of an encoded signature.
const SIGNATURE_HEADER_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("signature has no components")]
    Empty,
    #[error("signature component {index} is not finite")]
    NonFinite { index: usize },
    #[error("signature blob is {len} bytes, too short for the dimension header")]
    Truncated { len: usize },
    #[error("signature blob declares {dim} dimensions but carries {len} payload bytes")]
    LengthMismatch { dim: usize, len: usize },
}

/// Face signature: a fixed-length real vector produced by the external
/// feature extractor (typically 128-dimensional).
///
/// Construction validates that the vector is non-empty and finite, so a
/// `Signature` in hand is always comparable against one of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Fail with [`SignatureError::DimensionMismatch`] unless `self` has `expected` components.
    pub fn ensure_dim(&self, expected: usize) -> Result<(), SignatureError> {
        if self.dim() != expected {
            return Err(SignatureError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }

    /// Euclidean distance to `other`. Mismatched lengths are an error, never a large distance.
    pub fn euclidean_distance(&self, other: &Signature) -> Result<f32, SignatureError> {
        other.ensure_dim(self.dim())?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Encode as `u32` LE dimensionality followed by `dim` LE `f32` values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_HEADER_LEN + self.values.len() * 4);
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode the format written by [`to_bytes`](Self::to_bytes), validating
    /// the header against the payload length and every value for finiteness.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() < SIGNATURE_HEADER_LEN {
            return Err(SignatureError::Truncated { len: bytes.len() });
        }
        let (header, payload) = bytes.split_at(SIGNATURE_HEADER_LEN);
        let dim = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if payload.len() != dim.saturating_mul(4) {
            return Err(SignatureError::LengthMismatch {
                dim,
                len: payload.len(),
            });
        }
        let values = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(values)
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(sig: Signature) -> Self {
        sig.values
    }
}

/// A registered person of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Externally assigned, stable identifier (the subject key).
    pub id: String,
    pub name: String,
    pub age: u32,
    pub crime: String,
    /// Absent when the subject was enrolled without a face.
    pub signature: Option<Signature>,
    pub enrolled_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        age: u32,
        crime: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            age,
            crime: crime.into(),
            signature: None,
            enrolled_at: Utc::now(),
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// One matchable gallery row: a subject key and its stored signature.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub subject_id: String,
    pub signature: Signature,
}

/// Identifier stamped on every record a capture session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
