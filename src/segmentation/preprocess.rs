use super::types::ConfidenceMask;
use crate::error::Result;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Converts RGB frames to model input tensors and model output planes back
/// to frame-resolution confidence masks.
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to the model's input dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        tensor
    }

    /// Convert a model-resolution confidence plane into a byte mask at the
    /// frame's resolution.
    ///
    /// # Arguments
    /// * `plane` - Flattened confidence values in [0, 1] at model resolution
    /// * `plane_width` / `plane_height` - Dimensions of the plane
    /// * `target_width` / `target_height` - The live frame's dimensions
    pub fn confidence_to_mask(
        plane: &[f32],
        plane_width: u32,
        plane_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<ConfidenceMask> {
        let _span = tracing::debug_span!("postprocess").entered();

        let gray = image::GrayImage::from_fn(plane_width, plane_height, |x, y| {
            let value = plane[(y * plane_width + x) as usize];
            image::Luma([(value * 255.0).clamp(0.0, 255.0) as u8])
        });

        if (plane_width, plane_height) == (target_width, target_height) {
            return ConfidenceMask::from_raw(target_width, target_height, gray.into_raw());
        }

        let resized = imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        );

        ConfidenceMask::from_raw(target_width, target_height, resized.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_is_nchw_and_normalized() {
        let mut image = RgbImage::new(4, 4);
        image.put_pixel(1, 2, image::Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(4, 4).to_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        assert_eq!(tensor[[0, 0, 2, 1]], 1.0);
        assert_eq!(tensor[[0, 1, 2, 1]], 0.0);
        assert!((tensor[[0, 2, 2, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn confidence_plane_resizes_to_frame_dimensions() {
        let plane = vec![1.0f32; 4];
        let mask = Preprocessor::confidence_to_mask(&plane, 2, 2, 8, 6).unwrap();
        assert_eq!((mask.width(), mask.height()), (8, 6));
        assert!(mask.as_bytes().iter().all(|&b| b == 255));
    }
}
