use super::types::Matte;
use anyhow::{ensure, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// ImageNet channel statistics expected by U²-Net style models
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Scale by the brightest channel value so the maximum is 1.0
    /// 3. Subtract the ImageNet mean and divide by its standard deviation
    /// 4. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        ensure!(
            image.width() > 0 && image.height() > 0,
            "cannot preprocess an empty image"
        );

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            )
        } else {
            image.clone()
        };

        let max = resized
            .as_raw()
            .iter()
            .copied()
            .max()
            .map(|m| (m as f32).max(1e-6))
            .unwrap_or(1.0);

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / max;
                tensor[[0, c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
            }
        }

        Ok(tensor)
    }

    /// Postprocess a raw model prediction back to original image dimensions
    ///
    /// The prediction is min-max normalized to [0, 1] before resizing, a
    /// constant prediction maps to all zeros.
    pub fn postprocess_matte(
        prediction: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Matte> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            prediction.len() == (matte_width * matte_height) as usize,
            "prediction has {} values, expected {}x{}",
            prediction.len(),
            matte_width,
            matte_height
        );

        let min = prediction.iter().copied().fold(f32::INFINITY, f32::min);
        let max = prediction.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        let normalized: Matte = if range > f32::EPSILON {
            prediction.iter().map(|v| (v - min) / range).collect()
        } else {
            vec![0.0; prediction.len()]
        };

        if matte_width == target_width && matte_height == target_height {
            return Ok(normalized);
        }

        let gray_image = matte_to_gray(&normalized, matte_width, matte_height);
        let resized = imageops::resize(
            &gray_image,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        );

        Ok(gray_to_matte(&resized))
    }
}

/// Quantize a matte to an 8-bit grayscale image
pub fn matte_to_gray(matte: &[f32], width: u32, height: u32) -> image::GrayImage {
    image::GrayImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        let value = (matte[idx] * 255.0).round().clamp(0.0, 255.0) as u8;
        image::Luma([value])
    })
}

pub fn gray_to_matte(gray: &image::GrayImage) -> Matte {
    gray.pixels().map(|p| p[0] as f32 / 255.0).collect()
}
