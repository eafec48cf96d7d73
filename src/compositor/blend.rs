use crate::error::{CompositeError, Result, Role};
use image::{imageops, Rgba, RgbaImage};

/// Dimensions of an image after clamping its longer side to `max_dimension`
///
/// Images already within bounds are unchanged. The shorter side is scaled
/// by the same factor and rounded to nearest, never below one pixel.
pub fn bounded_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale_side = |short: u32, long: u32| -> u32 {
        let (short, long, max) = (short as u64, long as u64, max_dimension as u64);
        ((short * max + long / 2) / long).max(1) as u32
    };

    if width >= height {
        (max_dimension, scale_side(height, width))
    } else {
        (scale_side(width, height), max_dimension)
    }
}

/// Downscale the foreground so that neither side exceeds `max_dimension`
pub fn bound_foreground(image: RgbaImage, max_dimension: u32) -> RgbaImage {
    let _span = tracing::debug_span!("bound").entered();

    let (width, height) = image.dimensions();
    let (new_width, new_height) = bounded_dimensions(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return image;
    }

    tracing::debug!(
        "Downscaling foreground {}x{} -> {}x{}",
        width,
        height,
        new_width,
        new_height
    );
    imageops::resize(&image, new_width, new_height, imageops::FilterType::Lanczos3)
}

/// Stretch the background to exactly `width`x`height`, ignoring its aspect ratio
pub fn fit_background(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    let _span = tracing::debug_span!("fit").entered();

    if image.dimensions() == (width, height) {
        return image;
    }

    tracing::debug!(
        "Stretching background {}x{} -> {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );
    imageops::resize(&image, width, height, imageops::FilterType::Lanczos3)
}

/// Porter-Duff "over": place `foreground` on top of `background`
///
/// Both images use straight alpha and must have identical dimensions.
pub fn alpha_over(foreground: &RgbaImage, background: &RgbaImage) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("blend").entered();

    if foreground.dimensions() != background.dimensions() {
        let (width, height) = background.dimensions();
        return Err(CompositeError::Dimension {
            role: Role::Background,
            width,
            height,
            reason: format!(
                "does not match foreground {}x{}",
                foreground.width(),
                foreground.height()
            ),
        });
    }

    let mut output = RgbaImage::new(foreground.width(), foreground.height());
    for ((out, fg), bg) in output
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(background.pixels())
    {
        *out = over(*fg, *bg);
    }
    Ok(output)
}

fn over(fg: Rgba<u8>, bg: Rgba<u8>) -> Rgba<u8> {
    match fg[3] {
        255 => return fg,
        0 => return bg,
        _ => {}
    }

    let fa = fg[3] as f32 / 255.0;
    let ba = bg[3] as f32 / 255.0;
    let out_alpha = fa + ba * (1.0 - fa);

    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (fg[c] as f32 * fa + bg[c] as f32 * ba * (1.0 - fa)) / out_alpha;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}
