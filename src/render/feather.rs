use crate::segmentation::ConfidenceMask;
use image::{imageops, Rgba, RgbaImage};

/// Tuning for the confidence-to-alpha transfer.
///
/// Confidence below `low` is fully transparent, above `high` fully opaque,
/// with a linear ramp in between. The produced mask is then blurred with
/// `blur_sigma` to smooth the ramp edges. The two stages together avoid both
/// hard cutout edges and washed-out semi-transparent halos.
#[derive(Debug, Clone, Copy)]
pub struct FeatherConfig {
    pub low: f32,
    pub high: f32,
    pub blur_sigma: f32,
}

impl Default for FeatherConfig {
    fn default() -> Self {
        Self {
            low: 0.2,
            high: 0.5,
            blur_sigma: 2.0,
        }
    }
}

/// Turns raw confidence masks into feathered alpha masks.
///
/// The output is an opaque-white RGBA image whose alpha channel carries the
/// feathered opacity. The mask surface is reused across cycles and only
/// reallocated when the frame dimensions change.
pub struct MaskProcessor {
    config: FeatherConfig,
    surface: RgbaImage,
}

impl MaskProcessor {
    pub fn new(config: FeatherConfig) -> Self {
        Self {
            config,
            surface: RgbaImage::new(0, 0),
        }
    }

    /// Produce the feathered alpha mask for one cycle.
    pub fn feather(&mut self, mask: &ConfidenceMask) -> &RgbaImage {
        let (width, height) = (mask.width(), mask.height());
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbaImage::new(width, height);
        }

        let config = self.config;
        let bytes = mask.as_bytes();
        for (x, y, pixel) in self.surface.enumerate_pixels_mut() {
            let alpha = transfer(bytes[(y * width + x) as usize], config);
            *pixel = Rgba([255, 255, 255, (alpha * 255.0).round() as u8]);
        }

        if self.config.blur_sigma > 0.0 {
            self.surface = imageops::blur(&self.surface, self.config.blur_sigma);
        }

        &self.surface
    }
}

fn transfer(byte: u8, config: FeatherConfig) -> f32 {
    let confidence = byte as f32 / 255.0;
    if confidence < config.low {
        0.0
    } else if confidence < config.high {
        (confidence - config.low) / (config.high - config.low)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mask_of(bytes: Vec<u8>) -> ConfidenceMask {
        let len = bytes.len() as u32;
        ConfidenceMask::from_raw(len, 1, bytes).unwrap()
    }

    fn processor(blur_sigma: f32) -> MaskProcessor {
        MaskProcessor::new(FeatherConfig {
            blur_sigma,
            ..FeatherConfig::default()
        })
    }

    #[test]
    fn transfer_is_zero_below_ramp() {
        for byte in 0..51u8 {
            assert_eq!(transfer(byte, FeatherConfig::default()), 0.0, "byte {byte}");
        }
    }

    #[test]
    fn transfer_ramps_between_thresholds() {
        assert_eq!(transfer(51, FeatherConfig::default()), 0.0);
        for byte in 51..128u8 {
            let alpha = transfer(byte, FeatherConfig::default());
            assert!((0.0..=1.0).contains(&alpha), "byte {byte} -> {alpha}");
            assert!(alpha < 1.0, "byte {byte} saturated early");
        }
        // Just below the upper threshold the ramp is nearly saturated
        assert!(transfer(127, FeatherConfig::default()) > 0.98);
    }

    #[test]
    fn transfer_saturates_above_ramp() {
        for byte in 128..=255u16 {
            assert_eq!(transfer(byte as u8, FeatherConfig::default()), 1.0, "byte {byte}");
        }
    }

    #[test]
    fn feathered_mask_is_opaque_white_rgb() {
        let mut p = processor(0.0);
        let out = p.feather(&mask_of(vec![0, 80, 255]));
        for pixel in out.pixels() {
            assert_eq!(&pixel.0[..3], &[255, 255, 255]);
        }
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(2, 0).0[3], 255);
    }

    #[test]
    fn mask_dimensions_survive_blur() {
        let mut p = processor(2.0);
        let mask = ConfidenceMask::from_raw(6, 4, vec![200; 24]).unwrap();
        assert_eq!(p.feather(&mask).dimensions(), (6, 4));
    }

    #[test]
    fn surface_follows_dimension_change() {
        let mut p = processor(0.0);
        p.feather(&ConfidenceMask::from_raw(4, 2, vec![0; 8]).unwrap());
        let out = p.feather(&ConfidenceMask::from_raw(2, 2, vec![255; 4]).unwrap());
        assert_eq!(out.dimensions(), (2, 2));
    }

    proptest! {
        #[test]
        fn transfer_is_monotonic(a in 0u8..255) {
            let config = FeatherConfig::default();
            prop_assert!(transfer(a, config) <= transfer(a + 1, config));
        }

        #[test]
        fn transfer_stays_in_unit_range(byte in 0u8..=255u8) {
            let alpha = transfer(byte, FeatherConfig::default());
            prop_assert!((0.0..=1.0).contains(&alpha));
        }
    }
}
