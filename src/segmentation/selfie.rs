use super::preprocess::Preprocessor;
use super::types::{ConfidenceMask, SegmentationEngine};
use crate::error::{PipelineError, Result};
use anyhow::Context;
use image::RgbImage;
use ort::{
    CUDAExecutionProvider, ExecutionProviderDispatch, GraphOptimizationLevel, Session,
    TensorRTExecutionProvider,
};
use std::path::Path;

/// Which execution delegate the engine should prefer. GPU falls back to CPU
/// when no provider can be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPreference {
    Gpu,
    Cpu,
}

/// Selfie segmentation engine backed by an ONNX model.
///
/// The model takes a normalized NCHW frame and produces one confidence
/// plane per detected subject. Only the first plane is used.
pub struct SelfieSegmenter {
    session: Option<Session>,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmenter {
    /// Load a segmentation model from an ONNX file.
    ///
    /// # Default Configuration
    /// - Input size: 256x256 (common selfie-segmenter input)
    /// - GPU execution providers registered when preferred, CPU otherwise
    pub fn new<P: AsRef<Path>>(model_path: P, preference: ExecutionPreference) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading segmentation model from {}", path.display());

        let session =
            build_session(path, preference).map_err(|e| PipelineError::EngineInit(e.to_string()))?;

        tracing::info!("Segmentation model loaded successfully");

        // 256x256 keeps inference comfortably inside a refresh interval
        let width = 256;
        let height = 256;

        Ok(Self {
            session: Some(session),
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
        })
    }

    /// Run the session and return the first confidence plane with its
    /// dimensions. Output buffers owned by the runtime are dropped before
    /// returning, so nothing engine-side outlives the call.
    fn run_session(&mut self, input: ndarray::Array4<f32>) -> anyhow::Result<(Vec<f32>, u32, u32)> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("engine is closed"))?;

        let _span = tracing::debug_span!("inference").entered();
        let outputs = session.run(ort::inputs![input.view()]?)?;

        let tensor = outputs[0].try_extract_tensor::<f32>()?;
        let view = tensor.view();
        let shape = view.shape().to_vec();
        let data = view.as_slice().map(<[f32]>::to_vec).unwrap_or_else(|| {
            // Non-contiguous output, copy element-wise
            view.iter().copied().collect()
        });

        extract_primary_plane(&shape, data)
    }
}

fn build_session(path: &Path, preference: ExecutionPreference) -> anyhow::Result<Session> {
    let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();
    if preference == ExecutionPreference::Gpu {
        providers.push(TensorRTExecutionProvider::default().build());
        providers.push(CUDAExecutionProvider::default().build());
    }

    let session = Session::builder()?
        .with_execution_providers(providers)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model from {}", path.display()))?;

    Ok(session)
}

/// Pull the first subject's plane out of a model output.
///
/// Handles the common layouts: [1, C, H, W] (planar, first plane taken),
/// [1, H, W, C] (interleaved, first channel taken), and a bare [H, W].
/// A trailing dimension of at most 4 alongside a large second dimension is
/// treated as an interleaved channel count.
fn extract_primary_plane(shape: &[usize], data: Vec<f32>) -> anyhow::Result<(Vec<f32>, u32, u32)> {
    match *shape {
        [1, a, b, c] => {
            if c <= 4 && a > 4 {
                // [1, H, W, C]
                let (h, w, channels) = (a, b, c);
                let plane = if channels == 1 {
                    data
                } else {
                    (0..h * w).map(|i| data[i * channels]).collect()
                };
                Ok((plane, w as u32, h as u32))
            } else {
                // [1, C, H, W]
                let (h, w) = (b, c);
                Ok((data[..h * w].to_vec(), w as u32, h as u32))
            }
        }
        [h, w] => Ok((data, w as u32, h as u32)),
        _ => anyhow::bail!("unsupported mask output shape {shape:?}"),
    }
}

impl SegmentationEngine for SelfieSegmenter {
    fn infer(&mut self, frame: &RgbImage) -> Result<ConfidenceMask> {
        let _span = tracing::debug_span!("segment").entered();

        let input = self.preprocessor.to_tensor(frame);

        let (plane, plane_width, plane_height) = self
            .run_session(input)
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::confidence_to_mask(
            &plane,
            plane_width,
            plane_height,
            frame_width,
            frame_height,
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("Segmentation engine closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_plane_from_planar_output() {
        // [1, 2, 8, 8]: two subject planes, the first one wins
        let mut data = vec![0.25f32; 64];
        data.extend(vec![0.75f32; 64]);
        let (plane, w, h) = extract_primary_plane(&[1, 2, 8, 8], data).unwrap();
        assert_eq!((w, h), (8, 8));
        assert!(plane.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn primary_plane_from_interleaved_output() {
        // [1, 8, 8, 2]: per-pixel channel pairs, the first channel wins
        let data: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 0.25 } else { 0.75 }).collect();
        let (plane, w, h) = extract_primary_plane(&[1, 8, 8, 2], data).unwrap();
        assert_eq!((w, h), (8, 8));
        assert!(plane.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn primary_plane_from_bare_matrix() {
        let (plane, w, h) = extract_primary_plane(&[4, 6], vec![0.5; 24]).unwrap();
        assert_eq!((w, h), (6, 4));
        assert_eq!(plane.len(), 24);
    }

    #[test]
    fn rejects_unknown_output_shape() {
        assert!(extract_primary_plane(&[3, 1, 1, 1, 1], vec![0.0; 3]).is_err());
    }
}
