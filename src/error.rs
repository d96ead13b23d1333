use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline failure categories.
///
/// Initialization and device errors abort startup and are reported to the
/// caller. Everything else is contained within a single frame cycle by the
/// loop: the failing cycle is logged and skipped, and the next tick proceeds
/// normally.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The segmentation model or runtime failed to load. The pipeline runs
    /// without segmentation (pass-through) when this happens at startup.
    #[error("segmentation engine failed to initialize: {0}")]
    EngineInit(String),

    /// A single cycle's inference call failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Camera or output device could not be opened.
    #[error("device unavailable: {0}")]
    ResourceAcquisition(String),

    /// A selected background image or video could not be decoded. The mode
    /// stays selected and renders the gradient fallback instead.
    #[error("background asset failed to load: {0}")]
    AssetLoad(String),

    /// Writing a frame to the publish sink failed.
    #[error("publish sink error: {0}")]
    Sink(String),
}
