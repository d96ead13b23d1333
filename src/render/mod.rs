mod background;
mod compositor;
mod feather;

pub use background::{
    cover_fit, BackgroundAssets, BackgroundConfig, BackgroundImage, BackgroundMode,
    BackgroundRenderer, BackgroundVideo,
};
pub use compositor::Compositor;
pub use feather::{FeatherConfig, MaskProcessor};
