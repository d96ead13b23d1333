use crate::error::{PipelineError, Result};
use image::codecs::gif::GifDecoder;
use image::{imageops, AnimationDecoder, Rgb, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

/// The active background treatment. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundMode {
    /// Raw camera frames, no segmentation or compositing
    Passthrough,
    /// Fixed diagonal gradient
    Gradient,
    /// Blurred copy of the live frame
    Blur,
    /// User-selected still image
    Image,
    /// User-selected looping clip
    Video,
}

/// A decoded still image selected as the background.
pub struct BackgroundImage {
    image: RgbImage,
}

impl BackgroundImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| PipelineError::AssetLoad(format!("{}: {e}", path.display())))?
            .to_rgb8();
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// A looping background clip, decoded up front into frames.
///
/// Clips start playing on creation and carry no audio. While paused (or
/// before any frames are available) `current_frame` yields nothing and the
/// renderer falls back to the gradient for that frame.
pub struct BackgroundVideo {
    frames: Vec<RgbImage>,
    frame_delay: Duration,
    epoch: Instant,
    playing: bool,
}

impl BackgroundVideo {
    /// Decode an animated GIF into a looping clip.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PipelineError::AssetLoad(format!("{}: {e}", path.display())))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .map_err(|e| PipelineError::AssetLoad(format!("{}: {e}", path.display())))?;

        let decoded = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| PipelineError::AssetLoad(format!("{}: {e}", path.display())))?;

        let frame_delay = decoded
            .first()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                Duration::from_millis((numer / denom.max(1)) as u64)
            })
            .filter(|delay| !delay.is_zero())
            .unwrap_or(Duration::from_millis(100));

        let frames: Vec<RgbImage> = decoded
            .into_iter()
            .map(|frame| image::DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8())
            .collect();

        Self::from_frames(frames, frame_delay)
    }

    pub fn from_frames(frames: Vec<RgbImage>, frame_delay: Duration) -> Result<Self> {
        if frames.is_empty() {
            return Err(PipelineError::AssetLoad("clip has no frames".into()));
        }
        Ok(Self {
            frames,
            frame_delay: frame_delay.max(Duration::from_millis(1)),
            epoch: Instant::now(),
            playing: true,
        })
    }

    pub fn play(&mut self) {
        if !self.playing {
            self.epoch = Instant::now();
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn frame_index(&self, elapsed: Duration) -> usize {
        (elapsed.as_millis() / self.frame_delay.as_millis()) as usize % self.frames.len()
    }

    /// The clip frame to show right now, or nothing while paused.
    pub fn current_frame(&self) -> Option<&RgbImage> {
        if !self.playing {
            return None;
        }
        Some(&self.frames[self.frame_index(self.epoch.elapsed())])
    }
}

/// Assets bound to the image/video modes. Replaced wholesale when the user
/// selects a new file.
#[derive(Default)]
pub struct BackgroundAssets {
    pub image: Option<BackgroundImage>,
    pub video: Option<BackgroundVideo>,
}

/// Tuning for the rendered backgrounds.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundConfig {
    /// Gaussian sigma for the blur mode
    pub blur_sigma: f32,
    /// How far the source is enlarged past each edge before blurring, so
    /// the blur pulls no dark borders into view
    pub blur_margin: u32,
    /// Brightness multiplier applied after blurring
    pub brightness: f32,
    pub gradient_start: Rgb<u8>,
    pub gradient_end: Rgb<u8>,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 12.0,
            blur_margin: 30,
            brightness: 1.1,
            gradient_start: Rgb([0x34, 0x98, 0xdb]),
            gradient_end: Rgb([0x2c, 0x3e, 0x50]),
        }
    }
}

/// Renders the active background mode into a frame-sized surface.
pub struct BackgroundRenderer {
    config: BackgroundConfig,
}

impl BackgroundRenderer {
    pub fn new(config: BackgroundConfig) -> Self {
        Self { config }
    }

    /// Render the background for the current cycle. The result always has
    /// the source frame's dimensions. Modes whose asset is missing, not yet
    /// playing, or failed to load render the gradient instead.
    pub fn render(
        &self,
        mode: BackgroundMode,
        assets: &BackgroundAssets,
        source: &RgbImage,
    ) -> RgbImage {
        let (width, height) = source.dimensions();
        match mode {
            BackgroundMode::Blur => self.render_blur(source),
            BackgroundMode::Image => match &assets.image {
                Some(image) => cover_fit(image.image(), width, height),
                None => self.render_gradient(width, height),
            },
            BackgroundMode::Video => match assets.video.as_ref().and_then(|v| v.current_frame()) {
                Some(frame) => cover_fit(frame, width, height),
                None => self.render_gradient(width, height),
            },
            BackgroundMode::Gradient | BackgroundMode::Passthrough => {
                self.render_gradient(width, height)
            }
        }
    }

    fn render_blur(&self, source: &RgbImage) -> RgbImage {
        let (width, height) = source.dimensions();
        let margin = self.config.blur_margin;

        let enlarged = imageops::resize(
            source,
            width + 2 * margin,
            height + 2 * margin,
            imageops::FilterType::Triangle,
        );
        let mut blurred = imageops::blur(&enlarged, self.config.blur_sigma);

        let brightness = self.config.brightness;
        for pixel in blurred.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * brightness).min(255.0) as u8;
            }
        }

        imageops::crop_imm(&blurred, margin, margin, width, height).to_image()
    }

    fn render_gradient(&self, width: u32, height: u32) -> RgbImage {
        let start = self.config.gradient_start;
        let end = self.config.gradient_end;
        // Linear gradient from the top-left corner towards (width, height):
        // project each pixel onto the diagonal axis
        let denom = (width as f64).powi(2) + (height as f64).powi(2);
        RgbImage::from_fn(width, height, |x, y| {
            let t = (x as f64 * width as f64 + y as f64 * height as f64) / denom;
            let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
            Rgb([
                mix(start[0], end[0]),
                mix(start[1], end[1]),
                mix(start[2], end[2]),
            ])
        })
    }
}

/// Geometry of a cover fit: the content's render size and centering offsets
/// such that it fully covers the target box while keeping its aspect ratio.
fn cover_geometry(
    content_width: u32,
    content_height: u32,
    target_width: u32,
    target_height: u32,
) -> (u32, u32, i64, i64) {
    let content_aspect = content_width as f64 / content_height as f64;
    let target_aspect = target_width as f64 / target_height as f64;

    let (render_width, render_height) = if content_aspect > target_aspect {
        // Content is wider: fill the height, crop the sides
        let width = (target_height as f64 * content_aspect).round() as u32;
        (width.max(target_width), target_height)
    } else {
        // Content is taller or equal: fill the width, crop top and bottom
        let height = (target_width as f64 / content_aspect).round() as u32;
        (target_width, height.max(target_height))
    };

    let offset_x = (target_width as i64 - render_width as i64) / 2;
    let offset_y = (target_height as i64 - render_height as i64) / 2;
    (render_width, render_height, offset_x, offset_y)
}

/// Scale and center-crop content to fully fill the target box, preserving
/// the content's aspect ratio.
pub fn cover_fit(content: &RgbImage, target_width: u32, target_height: u32) -> RgbImage {
    let (content_width, content_height) = content.dimensions();
    if (content_width, content_height) == (target_width, target_height) {
        return content.clone();
    }

    let (render_width, render_height, offset_x, offset_y) =
        cover_geometry(content_width, content_height, target_width, target_height);

    let resized = imageops::resize(
        content,
        render_width,
        render_height,
        imageops::FilterType::Lanczos3,
    );

    let mut target = RgbImage::new(target_width, target_height);
    imageops::overlay(&mut target, &resized, offset_x, offset_y);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    fn halves(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| if x < width / 2 { RED } else { BLUE })
    }

    #[test]
    fn wide_content_on_narrow_target_crops_horizontally() {
        // 16:9 content on a 4:3 target: fills vertically, crops the sides
        let content = halves(160, 90);
        let (rw, rh, ox, oy) = cover_geometry(160, 90, 120, 90);
        assert_eq!((rw, rh), (160, 90));
        assert_eq!((ox, oy), (-20, 0));

        let out = cover_fit(&content, 120, 90);
        assert_eq!(out.dimensions(), (120, 90));
        // x=0 maps to content x=20, still in the red half
        assert_eq!(*out.get_pixel(0, 45), RED);
        assert_eq!(*out.get_pixel(119, 45), BLUE);
    }

    #[test]
    fn tall_content_on_wide_target_crops_vertically() {
        let (rw, rh, ox, oy) = cover_geometry(90, 160, 120, 90);
        assert_eq!(rw, 120);
        assert!(rh >= 90);
        assert_eq!(ox, 0);
        assert!(oy < 0);
    }

    #[test]
    fn cover_preserves_aspect_ratio() {
        let (rw, rh, _, _) = cover_geometry(1920, 1080, 640, 640);
        let content_aspect = 1920.0 / 1080.0;
        let render_aspect = rw as f64 / rh as f64;
        assert!((content_aspect - render_aspect).abs() < 0.01);
    }

    #[test]
    fn gradient_runs_between_configured_stops() {
        let renderer = BackgroundRenderer::new(BackgroundConfig::default());
        let out = renderer.render_gradient(64, 48);
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(*out.get_pixel(0, 0), Rgb([0x34, 0x98, 0xdb]));
        // Far corner sits just short of t=1
        let corner = out.get_pixel(63, 47);
        assert!(corner[0] < 0x40 && corner[2] < 0x60);
    }

    #[test]
    fn blur_output_matches_source_dimensions() {
        let renderer = BackgroundRenderer::new(BackgroundConfig {
            blur_sigma: 3.0,
            ..BackgroundConfig::default()
        });
        let source = halves(64, 48);
        assert_eq!(renderer.render_blur(&source).dimensions(), (64, 48));
    }

    #[test]
    fn image_mode_without_asset_falls_back_to_gradient() {
        let renderer = BackgroundRenderer::new(BackgroundConfig::default());
        let source = halves(32, 24);
        let out = renderer.render(BackgroundMode::Image, &BackgroundAssets::default(), &source);
        assert_eq!(*out.get_pixel(0, 0), Rgb([0x34, 0x98, 0xdb]));
    }

    #[test]
    fn paused_clip_renders_gradient() {
        let renderer = BackgroundRenderer::new(BackgroundConfig::default());
        let mut video =
            BackgroundVideo::from_frames(vec![halves(32, 24)], Duration::from_millis(40)).unwrap();
        video.pause();
        let assets = BackgroundAssets {
            video: Some(video),
            ..BackgroundAssets::default()
        };
        let source = halves(32, 24);
        let out = renderer.render(BackgroundMode::Video, &assets, &source);
        assert_eq!(*out.get_pixel(0, 0), Rgb([0x34, 0x98, 0xdb]));
    }

    #[test]
    fn playing_clip_renders_its_current_frame() {
        let renderer = BackgroundRenderer::new(BackgroundConfig::default());
        let clip = RgbImage::from_pixel(32, 24, RED);
        let video = BackgroundVideo::from_frames(vec![clip], Duration::from_millis(40)).unwrap();
        let assets = BackgroundAssets {
            video: Some(video),
            ..BackgroundAssets::default()
        };
        let source = halves(32, 24);
        let out = renderer.render(BackgroundMode::Video, &assets, &source);
        assert_eq!(*out.get_pixel(16, 12), RED);
    }

    #[test]
    fn clip_loops_over_its_frames() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, RED),
            RgbImage::from_pixel(2, 2, BLUE),
        ];
        let video = BackgroundVideo::from_frames(frames, Duration::from_millis(40)).unwrap();
        assert_eq!(video.frame_index(Duration::from_millis(0)), 0);
        assert_eq!(video.frame_index(Duration::from_millis(45)), 1);
        assert_eq!(video.frame_index(Duration::from_millis(85)), 0);
    }

    #[test]
    fn empty_clip_is_an_asset_error() {
        let result = BackgroundVideo::from_frames(Vec::new(), Duration::from_millis(40));
        assert!(matches!(result, Err(PipelineError::AssetLoad(_))));
    }

    #[test]
    fn missing_image_file_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BackgroundImage::open(dir.path().join("nope.png"));
        assert!(matches!(result, Err(PipelineError::AssetLoad(_))));
    }

    #[test]
    fn image_file_round_trips_through_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        halves(8, 8).save(&path).unwrap();
        let asset = BackgroundImage::open(&path).unwrap();
        assert_eq!(asset.image().dimensions(), (8, 8));
    }

    proptest! {
        #[test]
        fn cover_never_letterboxes(
            cw in 1u32..200, ch in 1u32..200,
            tw in 1u32..200, th in 1u32..200,
        ) {
            let (rw, rh, ox, oy) = cover_geometry(cw, ch, tw, th);
            prop_assert!(rw >= tw && rh >= th);
            prop_assert!(ox <= 0 && oy <= 0);
            prop_assert!(ox + rw as i64 >= tw as i64);
            prop_assert!(oy + rh as i64 >= th as i64);
        }
    }
}
