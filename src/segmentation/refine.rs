//! Trimap-based refinement of a segmentation matte.
//!
//! Confident regions are eroded and pinned to fully opaque or fully
//! transparent, the band between them keeps a smoothed version of the raw
//! matte so hair and soft edges blend instead of being cut hard.

use super::preprocess::{gray_to_matte, matte_to_gray};
use super::types::Matte;
use image::imageops;

/// Matte values above this (out of 255) are certain foreground
pub const FOREGROUND_THRESHOLD: u8 = 240;
/// Matte values below this (out of 255) are certain background
pub const BACKGROUND_THRESHOLD: u8 = 10;
/// Side of the square structuring element used to erode certain regions
pub const ERODE_SIZE: usize = 10;

/// Sigma of the blur applied to the matte inside the unknown band
const EDGE_SIGMA: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimapValue {
    Background,
    Unknown,
    Foreground,
}

/// Classify every matte value as certain foreground, certain background or unknown
pub fn trimap(matte: &[f32], width: u32, height: u32) -> Vec<TrimapValue> {
    let (w, h) = (width as usize, height as usize);
    let fg_cut = FOREGROUND_THRESHOLD as f32 / 255.0;
    let bg_cut = BACKGROUND_THRESHOLD as f32 / 255.0;

    let foreground: Vec<bool> = matte.iter().map(|&v| v > fg_cut).collect();
    let background: Vec<bool> = matte.iter().map(|&v| v < bg_cut).collect();

    // A subject cut off by the frame is uncertain along the frame edge,
    // the backdrop is not
    let foreground = erode(&foreground, w, h, ERODE_SIZE, false);
    let background = erode(&background, w, h, ERODE_SIZE, true);

    foreground
        .iter()
        .zip(&background)
        .map(|(&fg, &bg)| match (fg, bg) {
            (true, _) => TrimapValue::Foreground,
            (false, true) => TrimapValue::Background,
            (false, false) => TrimapValue::Unknown,
        })
        .collect()
}

/// Refine `matte` in place of the raw model output
pub fn refine_matte(matte: &[f32], width: u32, height: u32) -> Matte {
    let _span = tracing::debug_span!("alpha_matting").entered();

    let trimap = trimap(matte, width, height);
    let smoothed = gray_to_matte(&imageops::blur(
        &matte_to_gray(matte, width, height),
        EDGE_SIGMA,
    ));

    let unknown = trimap
        .iter()
        .filter(|t| **t == TrimapValue::Unknown)
        .count();
    tracing::debug!("Trimap unknown band covers {} pixels", unknown);

    trimap
        .iter()
        .zip(&smoothed)
        .map(|(t, &soft)| match t {
            TrimapValue::Foreground => 1.0,
            TrimapValue::Background => 0.0,
            TrimapValue::Unknown => soft,
        })
        .collect()
}

/// Binary erosion with a `size`x`size` square, pixels outside the image count as `outside`
///
/// Separable: a row pass followed by a column pass of a sliding minimum.
fn erode(mask: &[bool], width: usize, height: usize, size: usize, outside: bool) -> Vec<bool> {
    if size <= 1 {
        return mask.to_vec();
    }
    // Same anchor as a centered structuring element of even size
    let before = size / 2;
    let after = size - 1 - before;

    let mut rows = vec![false; mask.len()];
    for y in 0..height {
        let row = &mask[y * width..(y + 1) * width];
        for x in 0..width {
            let start = x.saturating_sub(before);
            let end = (x + after).min(width - 1);
            let clipped = x < before || x + after >= width;
            rows[y * width + x] =
                (outside || !clipped) && row[start..=end].iter().all(|&v| v);
        }
    }

    let mut output = vec![false; mask.len()];
    for x in 0..width {
        for y in 0..height {
            let start = y.saturating_sub(before);
            let end = (y + after).min(height - 1);
            let clipped = y < before || y + after >= height;
            output[y * width + x] =
                (outside || !clipped) && (start..=end).all(|yy| rows[yy * width + x]);
        }
    }
    output
}
