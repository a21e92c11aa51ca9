//! One-shot signature capture for identification.

use std::time::Duration;
use thiserror::Error;
use vigil_core::source::{ExtractorError, SourceError};
use vigil_core::{FramePoll, FrameSource, Signature, SignatureExtractor};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no face detected in {0} frames")]
    NoFaceDetected(u32),
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("signature extractor: {0}")]
    Extractor(#[from] ExtractorError),
}

struct Release<'a>(&'a mut dyn FrameSource);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Read up to `max_frames` frames and return the first signature the
/// extractor produces. The source is released on every exit path.
pub fn capture_signature(
    source: &mut dyn FrameSource,
    extractor: &mut dyn SignatureExtractor,
    max_frames: u32,
    frame_timeout: Duration,
) -> Result<Signature, ProbeError> {
    let mut source = Release(source);
    let mut seen = 0u32;

    while seen < max_frames {
        match source.0.next_frame(frame_timeout)? {
            FramePoll::Frame(frame) => {
                seen += 1;
                if let Some(signature) = extractor.extract(&frame)? {
                    tracing::debug!(seq = frame.sequence, frames = seen, "signature captured");
                    return Ok(signature);
                }
            }
            FramePoll::Pending => {
                // A timeout counts against the budget so a dead device
                // cannot stall the probe.
                seen += 1;
            }
            FramePoll::EndOfStream => break,
        }
    }

    tracing::info!(frames = seen, "no face detected");
    Err(ProbeError::NoFaceDetected(seen))
}
