use super::preprocess::Preprocessor;
use super::refine;
use super::types::{apply_matte, Refinement, Segmenter};
use anyhow::{anyhow, ensure, Context, Result};
use image::{DynamicImage, RgbaImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use std::path::Path;

/// Square input resolution of the U²-Net model family
const INPUT_SIZE: u32 = 320;

/// Salient-object segmentation with a U²-Net ONNX model
///
/// Stateless: every call runs a single inference on one image.
pub struct U2NetSegmenter {
    session: Session,
    preprocessor: Preprocessor,
}

impl U2NetSegmenter {
    /// Create a new segmenter from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to a U²-Net (u2net, u2netp, silueta) ONNX export
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading U2-Net model from {}", path.display());

        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow!("Failed to set intra-op threads: {e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("Failed to load model from {}: {e}", path.display()))?;

        tracing::info!("U2-Net model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(INPUT_SIZE, INPUT_SIZE),
        })
    }
}

impl Segmenter for U2NetSegmenter {
    fn segment(&mut self, image: &RgbaImage, refinement: Refinement) -> Result<RgbaImage> {
        let _span = tracing::debug_span!("u2net_segment").entered();

        let (width, height) = image.dimensions();
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let input_tensor = self.preprocessor.preprocess(&rgb)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let input = TensorRef::from_array_view(&input_tensor)
            .map_err(|e| anyhow!("Failed to bind input tensor: {e}"))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;

        // First output is the fused saliency map, shape [1, 1, H, W]
        let prediction = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("Failed to read model output: {e}"))?;
        let shape = prediction.shape().to_vec();
        ensure!(
            shape.len() == 4 && shape[0] == 1,
            "unexpected model output shape {:?}",
            shape
        );
        let (matte_height, matte_width) = (shape[2], shape[3]);
        let channel: Vec<f32> = prediction
            .iter()
            .take(matte_height * matte_width)
            .copied()
            .collect();
        drop(outputs);
        drop(_infer_span);

        let matte = Preprocessor::postprocess_matte(
            &channel,
            matte_width as u32,
            matte_height as u32,
            width,
            height,
        )
        .context("Failed to postprocess matte")?;

        let matte = match refinement {
            Refinement::None => matte,
            Refinement::AlphaMatting => refine::refine_matte(&matte, width, height),
        };

        Ok(apply_matte(image, &matte))
    }
}
