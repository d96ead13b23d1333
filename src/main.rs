mod capture;
mod error;
mod output;
mod pipeline;
mod render;
mod segmentation;

use anyhow::{Context, Result};
use capture::WebcamSource;
use clap::Parser;
use output::{LoopbackSink, StreamPublisher};
use pipeline::{BackgroundControl, PipelineConfig};
use render::{BackgroundConfig, BackgroundImage, BackgroundMode, BackgroundVideo, FeatherConfig};
use segmentation::ExecutionPreference;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1920)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 1080)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Refresh ticks per second driving the frame loop
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to the segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Run inference on CPU even when a GPU provider is available
    #[arg(long)]
    cpu: bool,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Participant identity used to derive outgoing stream names
    #[arg(long, default_value = "mattecast")]
    identity: String,

    /// Initial background treatment
    #[arg(long, value_enum, default_value_t = BackgroundArg::Passthrough)]
    background: BackgroundArg,

    /// Background image file (selects image mode)
    #[arg(long)]
    background_image: Option<PathBuf>,

    /// Background clip file (selects video mode)
    #[arg(long)]
    background_video: Option<PathBuf>,

    /// Confidence below this level renders fully transparent
    #[arg(long, default_value_t = 0.2)]
    feather_low: f32,

    /// Confidence above this level renders fully opaque
    #[arg(long, default_value_t = 0.5)]
    feather_high: f32,

    /// Gaussian sigma smoothing the feathered mask edges
    #[arg(long, default_value_t = 2.0)]
    mask_blur: f32,

    /// Gaussian sigma for the blur background mode
    #[arg(long, default_value_t = 12.0)]
    background_blur: f32,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackgroundArg {
    Passthrough,
    Gradient,
    Blur,
    Image,
    Video,
}

impl From<BackgroundArg> for BackgroundMode {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::Passthrough => BackgroundMode::Passthrough,
            BackgroundArg::Gradient => BackgroundMode::Gradient,
            BackgroundArg::Blur => BackgroundMode::Blur,
            BackgroundArg::Image => BackgroundMode::Image,
            BackgroundArg::Video => BackgroundMode::Video,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Mattecast starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Refresh rate: {} Hz", args.fps);

    // Initialize capture
    let source = WebcamSource::new(args.input_device, args.capture_width, args.capture_height)
        .context("Failed to access the camera — check that it is connected and permitted")?;

    // Initialize the virtual camera output
    let sink = LoopbackSink::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    // Load the segmentation engine if a model was provided. A model that
    // fails to load is not fatal: segmentation is simply unavailable and
    // every frame takes the pass-through path.
    let engine = match &args.model {
        Some(model_path) => {
            let preference = if args.cpu {
                ExecutionPreference::Cpu
            } else {
                ExecutionPreference::Gpu
            };
            match segmentation::create_default_engine(model_path, preference) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    tracing::error!(
                        "{e}; virtual backgrounds are unavailable, continuing in passthrough mode"
                    );
                    None
                }
            }
        }
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            None
        }
    };

    let control = BackgroundControl::new();
    apply_background_selection(&args, &control);

    let mut publisher = StreamPublisher::new(args.identity.clone());
    publisher.publish_camera();

    let config = PipelineConfig {
        refresh_rate: args.fps,
        feather: FeatherConfig {
            low: args.feather_low,
            high: args.feather_high,
            blur_sigma: args.mask_blur,
        },
        background: BackgroundConfig {
            blur_sigma: args.background_blur,
            ..BackgroundConfig::default()
        },
        show_matte: args.show_matte,
        ..PipelineConfig::default()
    };

    let mut handle = pipeline::start(
        Box::new(source),
        engine,
        publisher,
        Box::new(sink),
        control,
        config,
    );

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;

    handle.stop().await;
    tracing::info!("Stopped");

    Ok(())
}

/// Apply the background selected on the command line. A file that fails to
/// decode leaves its mode selected; the renderer falls back to the gradient
/// until a working asset is bound.
fn apply_background_selection(args: &Args, control: &BackgroundControl) {
    if let Some(path) = &args.background_image {
        match BackgroundImage::open(path) {
            Ok(image) => control.set_image(image),
            Err(e) => {
                tracing::warn!("{e}; image mode will render the gradient fallback");
                control.set_mode(BackgroundMode::Image);
            }
        }
        return;
    }

    if let Some(path) = &args.background_video {
        match BackgroundVideo::open(path) {
            Ok(video) => control.set_video(video),
            Err(e) => {
                tracing::warn!("{e}; video mode will render the gradient fallback");
                control.set_mode(BackgroundMode::Video);
            }
        }
        return;
    }

    control.set_mode(args.background.into());
}
