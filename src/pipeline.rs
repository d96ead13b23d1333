use crate::capture::FrameSource;
use crate::output::{PublishSink, StreamPublisher};
use crate::render::{
    BackgroundAssets, BackgroundConfig, BackgroundImage, BackgroundMode, BackgroundRenderer,
    BackgroundVideo, Compositor, FeatherConfig, MaskProcessor,
};
use crate::segmentation::SegmentationEngine;
use image::RgbImage;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Tuning for the frame loop.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Refresh ticks per second driving the loop
    pub refresh_rate: u32,
    pub feather: FeatherConfig,
    pub background: BackgroundConfig,
    /// Opacity of the outer-edge stroke on composited frames
    pub border_alpha: f32,
    /// Publish the grayscale matte instead of the composite (debugging)
    pub show_matte: bool,
    /// Frames between timing stat logs, 0 to disable
    pub stats_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refresh_rate: 30,
            feather: FeatherConfig::default(),
            background: BackgroundConfig::default(),
            border_alpha: 0.1,
            show_matte: false,
            stats_interval: 30,
        }
    }
}

struct BackgroundState {
    mode: BackgroundMode,
    assets: BackgroundAssets,
}

/// Shared handle to the background selection.
///
/// Writers are user-triggered mode changes; the only reader is the loop's
/// draw phase, which takes one lock per tick. Every setter swaps the whole
/// mode+asset pair inside a single critical section, so a tick observes
/// either the old selection or the new one, never a mix.
#[derive(Clone)]
pub struct BackgroundControl {
    inner: Arc<Mutex<BackgroundState>>,
}

impl BackgroundControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackgroundState {
                mode: BackgroundMode::Passthrough,
                assets: BackgroundAssets::default(),
            })),
        }
    }

    pub fn mode(&self) -> BackgroundMode {
        self.inner.lock().mode
    }

    pub fn set_mode(&self, mode: BackgroundMode) {
        let mut state = self.inner.lock();
        Self::pause_clip_if_leaving_video(&mut state, mode);
        state.mode = mode;
        tracing::info!("Background mode set to {mode:?}");
    }

    /// Bind a new background image and switch to image mode in one step.
    pub fn set_image(&self, image: BackgroundImage) {
        let mut state = self.inner.lock();
        Self::pause_clip_if_leaving_video(&mut state, BackgroundMode::Image);
        state.assets.image = Some(image);
        state.mode = BackgroundMode::Image;
    }

    /// Bind a new background clip and switch to video mode in one step.
    pub fn set_video(&self, video: BackgroundVideo) {
        let mut state = self.inner.lock();
        state.assets.video = Some(video);
        state.mode = BackgroundMode::Video;
    }

    pub fn video_playing(&self) -> bool {
        self.inner
            .lock()
            .assets
            .video
            .as_ref()
            .is_some_and(BackgroundVideo::is_playing)
    }

    fn pause_clip_if_leaving_video(state: &mut BackgroundState, next: BackgroundMode) {
        if state.mode == BackgroundMode::Video && next != BackgroundMode::Video {
            if let Some(video) = state.assets.video.as_mut() {
                video.pause();
            }
        }
    }

    fn pause_video(&self) {
        if let Some(video) = self.inner.lock().assets.video.as_mut() {
            video.pause();
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackgroundState> {
        self.inner.lock()
    }
}

impl Default for BackgroundControl {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-frame cycle: pull a fresh frame, infer, feather, render the
/// background, composite, publish, reschedule.
struct FrameLoop {
    source: Box<dyn FrameSource>,
    engine: Option<Box<dyn SegmentationEngine>>,
    publisher: StreamPublisher,
    /// Sink waiting for the first produced output before being published
    pending_sink: Option<Box<dyn PublishSink>>,
    control: BackgroundControl,
    mask_processor: MaskProcessor,
    renderer: BackgroundRenderer,
    compositor: Compositor,
    config: PipelineConfig,
    last_timestamp: f64,
    frames: u64,
    capture_time: Duration,
    infer_time: Duration,
    draw_time: Duration,
}

impl FrameLoop {
    fn new(
        source: Box<dyn FrameSource>,
        engine: Option<Box<dyn SegmentationEngine>>,
        publisher: StreamPublisher,
        sink: Box<dyn PublishSink>,
        control: BackgroundControl,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            engine,
            publisher,
            pending_sink: Some(sink),
            control,
            mask_processor: MaskProcessor::new(config.feather),
            renderer: BackgroundRenderer::new(config.background),
            compositor: Compositor::new(config.border_alpha),
            config,
            last_timestamp: -1.0,
            frames: 0,
            capture_time: Duration::ZERO,
            infer_time: Duration::ZERO,
            draw_time: Duration::ZERO,
        }
    }

    /// Publish one rendered frame, swapping the composited feed in for the
    /// raw camera the first time an output is produced.
    fn deliver(
        publisher: &mut StreamPublisher,
        pending_sink: &mut Option<Box<dyn PublishSink>>,
        frame: &RgbImage,
    ) {
        if let Some(sink) = pending_sink.take() {
            publisher.publish_composite(sink);
        }
        if let Err(e) = publisher.push_frame(frame) {
            tracing::warn!("{e}");
        }
    }

    async fn tick(&mut self) {
        let capture_start = Instant::now();
        let frame = match self.source.latest_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("frame capture failed: {e}");
                return;
            }
        };

        // A stalled source keeps its timestamp; skip the cycle without
        // running inference again
        if frame.timestamp == self.last_timestamp {
            return;
        }
        self.last_timestamp = frame.timestamp;
        self.capture_time += capture_start.elapsed();

        let mode = self.control.mode();
        if mode == BackgroundMode::Passthrough || self.engine.is_none() {
            let draw_start = Instant::now();
            let out = self.compositor.blit_source(&frame.image);
            Self::deliver(&mut self.publisher, &mut self.pending_sink, out);
            self.draw_time += draw_start.elapsed();
            self.frames += 1;
            self.maybe_log_stats();
            return;
        }

        // Inference is the cycle's only suspension point. The engine and
        // frame move into the blocking task and back out with the result,
        // so a new inference can only start after this one resolves.
        let infer_start = Instant::now();
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        let image = frame.image;
        let handoff = tokio::task::spawn_blocking(move || {
            let result = engine.infer(&image);
            (engine, image, result)
        })
        .await;

        let (engine, image, result) = match handoff {
            Ok(parts) => parts,
            Err(e) => {
                // A panicked inference task forfeits the engine; later
                // cycles fall back to pass-through
                tracing::error!("inference task aborted: {e}");
                return;
            }
        };
        self.engine = Some(engine);
        self.infer_time += infer_start.elapsed();

        let mask = match result {
            Ok(mask) => mask,
            Err(e) => {
                tracing::warn!("{e}; skipping this frame");
                return;
            }
        };

        let draw_start = Instant::now();
        if self.config.show_matte {
            let preview = mask.to_grayscale();
            Self::deliver(&mut self.publisher, &mut self.pending_sink, &preview);
        } else {
            // One lock for the whole draw phase: the tick composites with a
            // single consistent mode+asset pair
            let state = self.control.lock();
            if state.mode == BackgroundMode::Passthrough {
                drop(state);
                let out = self.compositor.blit_source(&image);
                Self::deliver(&mut self.publisher, &mut self.pending_sink, out);
            } else {
                let alpha = self.mask_processor.feather(&mask);
                let background = self.renderer.render(state.mode, &state.assets, &image);
                drop(state);
                let out = self.compositor.composite(&background, &image, alpha);
                Self::deliver(&mut self.publisher, &mut self.pending_sink, out);
            }
        }
        self.draw_time += draw_start.elapsed();
        self.frames += 1;
        self.maybe_log_stats();
        // The confidence mask drops here: engine-side buffers never
        // outlive the cycle that produced them
    }

    fn maybe_log_stats(&self) {
        if self.config.stats_interval == 0 || self.frames % self.config.stats_interval != 0 {
            return;
        }
        let n = self.frames as f64;
        let avg_capture_ms = self.capture_time.as_secs_f64() * 1000.0 / n;
        let avg_infer_ms = self.infer_time.as_secs_f64() * 1000.0 / n;
        let avg_draw_ms = self.draw_time.as_secs_f64() * 1000.0 / n;
        let total_ms = avg_capture_ms + avg_infer_ms + avg_draw_ms;
        tracing::info!(
            "Frame {}: capture={:.1}ms, segment={:.1}ms, draw={:.1}ms, total={:.1}ms",
            self.frames,
            avg_capture_ms,
            avg_infer_ms,
            avg_draw_ms,
            total_ms
        );
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let refresh_rate = self.config.refresh_rate.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / refresh_rate as f64));
        // A slow cycle skips the refresh ticks it missed instead of
        // replaying them as a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Starting frame loop at {refresh_rate} Hz");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.teardown();
    }

    fn teardown(&mut self) {
        tracing::info!("Tearing down pipeline");
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        self.control.pause_video();
        self.pending_sink = None;
        self.publisher.detach();
    }
}

/// Start/stop handle for a running pipeline. Dropping the handle leaves the
/// loop running; `stop` is the one cancellation point.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Stop the loop and wait for teardown to finish. Safe to call twice.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("frame loop task failed: {e}");
            }
        }
    }
}

/// Spawn the frame loop over the given source, engine and publish set.
///
/// The engine is optional: without one (model missing or failed to load)
/// every frame takes the pass-through path regardless of mode.
pub fn start(
    source: Box<dyn FrameSource>,
    engine: Option<Box<dyn SegmentationEngine>>,
    publisher: StreamPublisher,
    sink: Box<dyn PublishSink>,
    control: BackgroundControl,
    config: PipelineConfig,
) -> PipelineHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let frame_loop = FrameLoop::new(source, engine, publisher, sink, control, config);
    let task = tokio::spawn(frame_loop.run(shutdown_rx));
    PipelineHandle {
        shutdown,
        task: Some(task),
    }
}
