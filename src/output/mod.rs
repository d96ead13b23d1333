mod loopback;
mod publish;

pub use loopback::LoopbackSink;
pub use publish::{PublishedTrack, StreamPublisher, TrackKind};

use crate::error::Result;
use image::RgbImage;

/// Trait for publish sinks: anything that exposes rendered frames as a
/// continuous outgoing video feed.
pub trait PublishSink: Send {
    /// Write one rendered frame to the feed
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Get the feed's output resolution
    fn resolution(&self) -> (u32, u32);
}
