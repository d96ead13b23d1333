mod preprocess;
mod selfie;
pub mod types;

pub use preprocess::Preprocessor;
pub use selfie::{ExecutionPreference, SelfieSegmenter};
pub use types::{ConfidenceMask, SegmentationEngine};

use crate::error::Result;

/// Create the default segmentation engine from an ONNX model file
pub fn create_default_engine(
    model_path: &str,
    preference: ExecutionPreference,
) -> Result<Box<dyn SegmentationEngine>> {
    let engine = SelfieSegmenter::new(model_path, preference)?;
    Ok(Box::new(engine))
}
