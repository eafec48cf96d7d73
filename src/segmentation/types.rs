use anyhow::Result;
use image::RgbaImage;

/// Alpha matte: grayscale values where 0.0 = background, 1.0 = foreground
/// Dimensions match the segmented image, flattened in row-major order
pub type Matte = Vec<f32>;

/// Boundary refinement requested from a segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refinement {
    /// Use the raw matte as produced by the backend
    None,
    /// Trimap-based alpha matting of the subject boundary
    #[default]
    AlphaMatting,
}

/// Trait for background segmentation backends
/// Allows swapping between an ONNX model, a colour key, or a fixed mask in tests
pub trait Segmenter {
    /// Cut the subject out of `image`
    ///
    /// # Returns
    /// * A new RGBA image with the same dimensions as `image`, with background
    ///   pixels made transparent
    fn segment(&mut self, image: &RgbaImage, refinement: Refinement) -> Result<RgbaImage>;
}

impl<S: Segmenter + ?Sized> Segmenter for Box<S> {
    fn segment(&mut self, image: &RgbaImage, refinement: Refinement) -> Result<RgbaImage> {
        (**self).segment(image, refinement)
    }
}

/// Replace the alpha channel of `image` with `matte`
///
/// Existing transparency is kept: the new alpha is the product of both.
pub fn apply_matte(image: &RgbaImage, matte: &[f32]) -> RgbaImage {
    let (width, height) = image.dimensions();
    debug_assert_eq!(matte.len(), (width * height) as usize);

    let mut output = image.clone();
    for (pixel, &value) in output.pixels_mut().zip(matte) {
        let alpha = value.clamp(0.0, 1.0) * pixel[3] as f32;
        pixel[3] = alpha.round() as u8;
    }
    output
}
