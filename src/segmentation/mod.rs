mod color_key;
mod preprocess;
pub mod refine;
pub mod types;
mod u2net;

pub use color_key::ColorKeySegmenter;
pub use types::{Refinement, Segmenter};
pub use u2net::U2NetSegmenter;

use anyhow::Result;

/// Create the segmentation backend for the given model, or a colour key when none is set
pub fn create_segmenter(model_path: Option<&str>, color_tolerance: u32) -> Result<Box<dyn Segmenter>> {
    match model_path {
        Some(path) => Ok(Box::new(U2NetSegmenter::new(path)?)),
        None => {
            tracing::info!("No model given, keying out the border colour instead");
            Ok(Box::new(ColorKeySegmenter::new(color_tolerance)))
        }
    }
}
