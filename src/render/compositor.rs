use image::{Rgb, RgbImage, Rgba, RgbaImage};

/// Layers one cycle's surfaces into the final output frame.
///
/// Owns the foreground and output scratch surfaces, reused across cycles and
/// reallocated only when the source dimensions change. The draw order is
/// fixed: the background must be fully drawn before the masked foreground,
/// and the mask is applied to the foreground copy, never to the background.
pub struct Compositor {
    foreground: RgbaImage,
    output: RgbImage,
    border_alpha: f32,
}

impl Compositor {
    pub fn new(border_alpha: f32) -> Self {
        Self {
            foreground: RgbaImage::new(0, 0),
            output: RgbImage::new(0, 0),
            border_alpha,
        }
    }

    /// All surfaces in a pass share the live frame's dimensions; a mismatch
    /// forces a resize before any draw.
    fn ensure_size(&mut self, width: u32, height: u32) {
        if self.output.dimensions() != (width, height) {
            self.foreground = RgbaImage::new(width, height);
            self.output = RgbImage::new(width, height);
        }
    }

    /// Composite the masked source over the background.
    pub fn composite(
        &mut self,
        background: &RgbImage,
        source: &RgbImage,
        alpha_mask: &RgbaImage,
    ) -> &RgbImage {
        let (width, height) = source.dimensions();
        self.ensure_size(width, height);
        debug_assert_eq!(background.dimensions(), (width, height));
        debug_assert_eq!(alpha_mask.dimensions(), (width, height));

        // 1. Background first, covering the whole destination
        self.output.copy_from_slice(background);

        // 2.+3. Copy the raw frame into the foreground scratch with the
        // mask's alpha punched in (destination-in), cutting out the person
        // silhouette without ever touching the background
        for (x, y, fg) in self.foreground.enumerate_pixels_mut() {
            let src = source.get_pixel(x, y);
            let alpha = alpha_mask.get_pixel(x, y)[3];
            *fg = Rgba([src[0], src[1], src[2], alpha]);
        }

        // 4. Masked foreground over the background
        for (x, y, out) in self.output.enumerate_pixels_mut() {
            let fg = self.foreground.get_pixel(x, y);
            let alpha = fg[3] as f32 / 255.0;
            for channel in 0..3 {
                out[channel] = (fg[channel] as f32 * alpha
                    + out[channel] as f32 * (1.0 - alpha))
                    .round() as u8;
            }
        }

        // 5. Faint 1px stroke to mask residual fringe at the outer edge
        self.stroke_border();

        &self.output
    }

    /// Pass-through path: dimension-sync and blit the source, nothing else.
    pub fn blit_source(&mut self, source: &RgbImage) -> &RgbImage {
        let (width, height) = source.dimensions();
        self.ensure_size(width, height);
        self.output.copy_from_slice(source);
        &self.output
    }

    fn stroke_border(&mut self) {
        let (width, height) = self.output.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let alpha = self.border_alpha;
        let blend = |pixel: &mut Rgb<u8>| {
            for channel in 0..3 {
                pixel[channel] = (255.0 * alpha + pixel[channel] as f32 * (1.0 - alpha))
                    .round() as u8;
            }
        };

        for x in 0..width {
            blend(self.output.get_pixel_mut(x, 0));
            if height > 1 {
                blend(self.output.get_pixel_mut(x, height - 1));
            }
        }
        for y in 1..height.saturating_sub(1) {
            blend(self.output.get_pixel_mut(0, y));
            if width > 1 {
                blend(self.output.get_pixel_mut(width - 1, y));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BORDER_ALPHA: f32 = 0.1;

    fn flat_rgb(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    fn flat_mask(width: u32, height: u32, alpha: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, alpha]))
    }

    #[test]
    fn output_matches_source_dimensions() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let out = compositor.composite(
            &flat_rgb(64, 48, [0, 0, 0]),
            &flat_rgb(64, 48, [10, 20, 30]),
            &flat_mask(64, 48, 255),
        );
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn opaque_mask_keeps_the_source() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let out = compositor.composite(
            &flat_rgb(8, 8, [0, 255, 0]),
            &flat_rgb(8, 8, [200, 50, 25]),
            &flat_mask(8, 8, 255),
        );
        // Interior pixels show the person; only the border ring is touched
        assert_eq!(out.get_pixel(4, 4).0, [200, 50, 25]);
    }

    #[test]
    fn transparent_mask_shows_the_background() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let out = compositor.composite(
            &flat_rgb(8, 8, [0, 255, 0]),
            &flat_rgb(8, 8, [200, 50, 25]),
            &flat_mask(8, 8, 0),
        );
        assert_eq!(out.get_pixel(4, 4).0, [0, 255, 0]);
    }

    #[test]
    fn half_mask_blends_both_layers() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let out = compositor.composite(
            &flat_rgb(8, 8, [0, 0, 0]),
            &flat_rgb(8, 8, [200, 100, 50]),
            &flat_mask(8, 8, 128),
        );
        let pixel = out.get_pixel(4, 4);
        assert!((pixel[0] as i32 - 100).abs() <= 1);
        assert!((pixel[1] as i32 - 50).abs() <= 1);
        assert!((pixel[2] as i32 - 25).abs() <= 1);
    }

    #[test]
    fn border_ring_is_stroked() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let out = compositor.composite(
            &flat_rgb(8, 8, [0, 0, 0]),
            &flat_rgb(8, 8, [0, 0, 0]),
            &flat_mask(8, 8, 0),
        );
        // 10% white over black
        assert!((out.get_pixel(0, 0)[0] as i32 - 26).abs() <= 1);
        assert!((out.get_pixel(7, 7)[0] as i32 - 26).abs() <= 1);
        assert_eq!(out.get_pixel(4, 4).0, [0, 0, 0]);
    }

    #[test]
    fn scratch_surfaces_follow_dimension_changes() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        compositor.composite(
            &flat_rgb(16, 16, [0, 0, 0]),
            &flat_rgb(16, 16, [1, 1, 1]),
            &flat_mask(16, 16, 255),
        );
        let out = compositor.composite(
            &flat_rgb(4, 4, [0, 0, 0]),
            &flat_rgb(4, 4, [1, 1, 1]),
            &flat_mask(4, 4, 255),
        );
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn blit_copies_source_without_stroking() {
        let mut compositor = Compositor::new(BORDER_ALPHA);
        let source = flat_rgb(8, 8, [9, 9, 9]);
        let out = compositor.blit_source(&source);
        assert_eq!(out.get_pixel(0, 0).0, [9, 9, 9]);
        assert_eq!(out.get_pixel(4, 4).0, [9, 9, 9]);
    }
}
