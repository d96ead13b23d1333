mod webcam;

pub use webcam::WebcamSource;

use crate::error::Result;
use image::RgbImage;

/// A decoded frame together with the source timestamp it was produced at.
///
/// The timestamp advances once per distinct frame, so the loop can detect a
/// stalled source by comparing against the previous cycle's value.
pub struct SourceFrame {
    pub image: RgbImage,
    pub timestamp: f64,
}

/// Trait for live frame sources
pub trait FrameSource: Send {
    /// Return the most recent decodable frame
    fn latest_frame(&mut self) -> Result<SourceFrame>;

    /// Native resolution of produced frames
    fn resolution(&self) -> (u32, u32);
}
