//! Gallery matching: resolve a freshly captured signature to a subject key.

use crate::types::{GalleryEntry, Signature, SignatureError};
use serde::Serialize;

/// Conventional Euclidean tolerance for 128-d face embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Outcome of comparing a probe signature against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Identification {
    Matched {
        subject_id: String,
        distance: f32,
    },
    Unknown {
        /// Closest distance seen; `None` for an empty gallery.
        nearest_distance: Option<f32>,
    },
}

impl Identification {
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Identification::Matched { subject_id, .. } => Some(subject_id),
            Identification::Unknown { .. } => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Identification::Matched { .. })
    }
}

/// Strategy for comparing a probe signature against a gallery of enrolled subjects.
pub trait Matcher {
    fn identify(
        &self,
        probe: &Signature,
        gallery: &[GalleryEntry],
    ) -> Result<Identification, SignatureError>;
}

/// Distance-ranked Euclidean matcher.
///
/// Every gallery entry is compared. Among entries within `tolerance` the
/// smallest distance wins; equal distances keep the earlier entry in gallery
/// (enrollment) order.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn identify(
        &self,
        probe: &Signature,
        gallery: &[GalleryEntry],
    ) -> Result<Identification, SignatureError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.signature)?;
            // Strict comparison keeps the first of equally distant entries.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        Ok(match best {
            Some((idx, distance)) if distance <= self.tolerance => {
                tracing::debug!(subject = %gallery[idx].subject_id, distance, "signature matched");
                Identification::Matched {
                    subject_id: gallery[idx].subject_id.clone(),
                    distance,
                }
            }
            other => Identification::Unknown {
                nearest_distance: other.map(|(_, d)| d),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry {
            subject_id: id.into(),
            signature: Signature::new(values.to_vec()).unwrap(),
        }
    }

    fn probe(values: &[f32]) -> Signature {
        Signature::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let result = EuclideanMatcher::default().identify(&probe(&[1.0, 0.0]), &[]).unwrap();
        assert_eq!(result, Identification::Unknown { nearest_distance: None });
    }

    #[test]
    fn test_exact_signature_resolves_to_its_owner() {
        let gallery = vec![
            entry("A", &[0.1, 0.2, 0.3]),
            entry("B", &[0.4, 0.5, 0.6]),
            entry("C", &[0.7, 0.8, 0.9]),
        ];
        let matcher = EuclideanMatcher::default();
        for e in &gallery {
            let result = matcher.identify(&e.signature, &gallery).unwrap();
            assert_eq!(result.subject_id(), Some(e.subject_id.as_str()));
        }
    }

    #[test]
    fn test_closest_match_wins_over_earlier_match() {
        // Both within tolerance; the later entry is closer.
        let gallery = vec![entry("far", &[0.5, 0.0]), entry("near", &[0.1, 0.0])];
        let result = EuclideanMatcher::default()
            .identify(&probe(&[0.0, 0.0]), &gallery)
            .unwrap();
        assert_eq!(result.subject_id(), Some("near"));
    }

    #[test]
    fn test_equal_distance_keeps_enrollment_order() {
        let gallery = vec![entry("first", &[0.2, 0.0]), entry("second", &[-0.2, 0.0])];
        let result = EuclideanMatcher::default()
            .identify(&probe(&[0.0, 0.0]), &gallery)
            .unwrap();
        assert_eq!(result.subject_id(), Some("first"));
    }

    #[test]
    fn test_outside_tolerance_is_unknown_with_nearest_distance() {
        let gallery = vec![entry("A", &[3.0, 4.0])];
        let result = EuclideanMatcher { tolerance: 0.6 }
            .identify(&probe(&[0.0, 0.0]), &gallery)
            .unwrap();
        assert!(!result.is_match());
        match result {
            Identification::Unknown { nearest_distance: Some(d) } => assert!((d - 5.0).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let gallery = vec![entry("A", &[0.6, 0.0])];
        let result = EuclideanMatcher { tolerance: 0.6 }
            .identify(&probe(&[0.0, 0.0]), &gallery)
            .unwrap();
        assert!(result.is_match());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let gallery = vec![entry("A", &[0.0, 0.0]), entry("B", &[0.0, 0.0, 0.0])];
        let err = EuclideanMatcher::default()
            .identify(&probe(&[0.0, 0.0]), &gallery)
            .unwrap_err();
        assert_eq!(err, SignatureError::DimensionMismatch { expected: 2, actual: 3 });
    }
}
