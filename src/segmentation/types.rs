use crate::error::{PipelineError, Result};
use image::RgbImage;

/// Per-pixel confidence that a pixel belongs to the foreground subject.
/// One byte per pixel in row-major order: 0 = background, 255 = certain
/// foreground. Dimensions always match the frame it was inferred from.
///
/// A mask is owned by exactly one frame cycle: the loop moves it through
/// mask processing and drops it at cycle end, which is what releases the
/// engine-side buffers backing it. Masks are never retained across cycles.
pub struct ConfidenceMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ConfidenceMask {
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return Err(PipelineError::Inference(format!(
                "mask size {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Render the mask as a grayscale image for visual debugging
    pub fn to_grayscale(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let value = self.data[(y * self.width + x) as usize];
            image::Rgb([value, value, value])
        })
    }
}

/// Trait for segmentation engines
/// Allows swapping between different backends (selfie segmenters, matting
/// models, etc.)
pub trait SegmentationEngine: Send {
    /// Process a frame and return a confidence mask for the dominant
    /// detected subject. Models that report multiple subjects contribute
    /// only their first mask; the rest are ignored.
    fn infer(&mut self, frame: &RgbImage) -> Result<ConfidenceMask>;

    /// Reset internal state (for models with temporal components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Scene cuts detected
    /// - Starting a new video session
    fn reset(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Release the underlying model resources. Inference after close fails.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_size_mismatch() {
        let result = ConfidenceMask::from_raw(4, 4, vec![0u8; 15]);
        assert!(matches!(result, Err(PipelineError::Inference(_))));
    }

    #[test]
    fn grayscale_preserves_values() {
        let mask = ConfidenceMask::from_raw(2, 1, vec![0, 200]).unwrap();
        let image = mask.to_grayscale();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [200, 200, 200]);
    }
}
