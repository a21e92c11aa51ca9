//! Frame type and face-patch preparation for classifier adapters.

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Side length of the square patch seven-class emotion models expect.
pub const EMOTION_PATCH_SIZE: u32 = 48;

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

/// Axis-aligned face location in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// View the pixel buffer as an image; `None` if the buffer is shorter than `width * height`.
    pub fn to_image(&self) -> Option<GrayImage> {
        let pixels = (self.width as usize).checked_mul(self.height as usize)?;
        let data = self.data.get(..pixels)?.to_vec();
        GrayImage::from_raw(self.width, self.height, data)
    }

    /// Crop `region` (clamped to the frame), resize to 48x48 and scale to [0, 1].
    ///
    /// Returns `None` for a region that falls entirely outside the frame.
    pub fn emotion_patch(&self, region: FaceRegion) -> Option<Vec<f32>> {
        let image = self.to_image()?;
        if region.x >= self.width || region.y >= self.height {
            return None;
        }
        let w = region.width.min(self.width - region.x);
        let h = region.height.min(self.height - region.y);
        if w == 0 || h == 0 {
            return None;
        }

        let crop = imageops::crop_imm(&image, region.x, region.y, w, h).to_image();
        let patch = imageops::resize(&crop, EMOTION_PATCH_SIZE, EMOTION_PATCH_SIZE, FilterType::Triangle);

        Some(patch.into_raw().into_iter().map(|p| p as f32 / 255.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, fill: u8) -> Frame {
        Frame::new(vec![fill; (width * height) as usize], width, height, 0)
    }

    #[test]
    fn test_to_image_short_buffer() {
        let mut f = frame(4, 4, 0);
        f.data.truncate(10);
        assert!(f.to_image().is_none());
    }

    #[test]
    fn test_emotion_patch_shape_and_scale() {
        let f = frame(100, 80, 255);
        let patch = f
            .emotion_patch(FaceRegion { x: 10, y: 10, width: 40, height: 40 })
            .unwrap();
        assert_eq!(patch.len(), (EMOTION_PATCH_SIZE * EMOTION_PATCH_SIZE) as usize);
        assert!(patch.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_emotion_patch_clamps_region() {
        let f = frame(64, 64, 0);
        let patch = f.emotion_patch(FaceRegion { x: 50, y: 50, width: 100, height: 100 });
        assert_eq!(patch.map(|p| p.len()), Some(48 * 48));
    }

    #[test]
    fn test_emotion_patch_outside_frame() {
        let f = frame(32, 32, 0);
        assert!(f.emotion_patch(FaceRegion { x: 40, y: 0, width: 8, height: 8 }).is_none());
    }
}
