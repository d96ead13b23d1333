use super::PublishSink;
use crate::error::{PipelineError, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Publishes frames as a virtual camera through a v4l2loopback device.
///
/// The device format is negotiated up front; raw YUYV frames are then
/// written to the device file, which loopback readers consume as a live
/// camera feed at the display rate the pipeline produces.
pub struct LoopbackSink {
    file: File,
    width: u32,
    height: u32,
}

impl LoopbackSink {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path).map_err(|e| {
            PipelineError::ResourceAcquisition(format!(
                "open loopback device {}: {e}",
                path.display()
            ))
        })?;

        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        Output::set_format(&device, &format).map_err(|e| {
            PipelineError::ResourceAcquisition(format!(
                "set loopback format on {}: {e}",
                path.display()
            ))
        })?;
        drop(device);

        let file = File::options().write(true).open(path).map_err(|e| {
            PipelineError::ResourceAcquisition(format!(
                "open loopback device {} for writing: {e}",
                path.display()
            ))
        })?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
        })
    }

    /// Convert an RGB frame to packed YUV422 (YUYV), the format loopback
    /// readers commonly expect.
    fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
        let (width, height) = rgb_image.dimensions();
        let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

        for y in 0..height {
            for x in (0..width).step_by(2) {
                let pixel1 = rgb_image.get_pixel(x, y);
                let pixel2 = if x + 1 < width {
                    rgb_image.get_pixel(x + 1, y)
                } else {
                    pixel1
                };

                let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
                let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

                // U and V are shared by the pixel pair
                let u = ((u1 as u16 + u2 as u16) / 2) as u8;
                let v = ((v1 as u16 + v2 as u16) / 2) as u8;

                yuyv.push(y1);
                yuyv.push(u);
                yuyv.push(y2);
                yuyv.push(v);
            }
        }

        yuyv
    }
}

/// Convert RGB to YUV color space
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl PublishSink for LoopbackSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let frame = if frame.dimensions() != (self.width, self.height) {
            image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            )
        } else {
            frame.clone()
        };

        let yuyv_data = Self::rgb_to_yuyv(&frame);

        self.file
            .write_all(&yuyv_data)
            .map_err(|e| PipelineError::Sink(format!("write frame: {e}")))?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv_conversion_matches_known_values() {
        // Pure white: full luma, neutral chroma
        let (y, u, v) = rgb_to_yuv(255, 255, 255);
        assert_eq!(y, 255);
        assert!((u as i32 - 128).abs() <= 1);
        assert!((v as i32 - 128).abs() <= 1);

        // Pure black: no luma, neutral chroma
        let (y, u, v) = rgb_to_yuv(0, 0, 0);
        assert_eq!(y, 0);
        assert_eq!((u, v), (128, 128));
    }

    #[test]
    fn yuyv_packs_two_bytes_per_pixel() {
        let frame = RgbImage::from_pixel(6, 4, image::Rgb([10, 20, 30]));
        let packed = LoopbackSink::rgb_to_yuyv(&frame);
        assert_eq!(packed.len(), 6 * 4 * 2);
    }

    #[test]
    fn odd_width_duplicates_the_last_pixel() {
        let frame = RgbImage::from_pixel(3, 1, image::Rgb([128, 128, 128]));
        let packed = LoopbackSink::rgb_to_yuyv(&frame);
        assert_eq!(packed.len(), 4 * 2);
    }
}
