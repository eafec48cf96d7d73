mod blend;

use blend::{alpha_over, bound_foreground, fit_background};

use crate::codec::{decode_rgba, encode_png};
use crate::error::{CompositeError, Result, Role};
use crate::segmentation::{Refinement, Segmenter};
use image::RgbaImage;
use std::time::{Duration, Instant};

/// Longest side a foreground may have before it is sent to segmentation
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorConfig {
    /// Foreground images larger than this on either side are downscaled
    pub max_dimension: u32,
    /// Boundary refinement requested from the segmenter
    pub refinement: Refinement,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            refinement: Refinement::AlphaMatting,
        }
    }
}

impl CompositorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(CompositeError::InvalidConfig(
                "max_dimension must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replaces the backdrop of a foreground photo with a background photo
///
/// Each call to [`Compositor::composite`] is independent; the only state is
/// the configuration and the segmentation backend.
pub struct Compositor<S: Segmenter> {
    segmenter: S,
    config: CompositorConfig,
}

impl<S: Segmenter> Compositor<S> {
    pub fn new(segmenter: S, config: CompositorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { segmenter, config })
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Composite the subject of `foreground` over `background`
    ///
    /// Steps:
    /// 1. Decode both inputs and convert them to RGBA
    /// 2. Downscale the foreground to the configured maximum side
    /// 3. Cut the subject out with the segmenter
    /// 4. Stretch the background to the cut-out's size
    /// 5. Blend the cut-out over the background
    ///
    /// The output always has the dimensions of the (possibly downscaled)
    /// foreground. Any failure aborts the whole request.
    pub fn composite(&mut self, foreground: &[u8], background: &[u8]) -> Result<RgbaImage> {
        let _span = tracing::info_span!("composite").entered();
        let mut timings = StageTimings::default();

        let start = Instant::now();
        let foreground = decode_rgba(foreground, Role::Foreground)?;
        let background = decode_rgba(background, Role::Background)?;
        timings.decode = start.elapsed();

        let start = Instant::now();
        let foreground = bound_foreground(foreground, self.config.max_dimension);
        timings.bound = start.elapsed();

        let start = Instant::now();
        let cutout = self.segment(&foreground)?;
        timings.segment = start.elapsed();

        let start = Instant::now();
        let (width, height) = cutout.dimensions();
        let background = fit_background(background, width, height);
        timings.fit = start.elapsed();

        let start = Instant::now();
        let output = alpha_over(&cutout, &background)?;
        timings.blend = start.elapsed();

        tracing::info!(
            "Composited {}x{}: decode={:.1}ms, bound={:.1}ms, segment={:.1}ms, fit={:.1}ms, blend={:.1}ms",
            width,
            height,
            ms(timings.decode),
            ms(timings.bound),
            ms(timings.segment),
            ms(timings.fit),
            ms(timings.blend)
        );

        Ok(output)
    }

    /// Same as [`Compositor::composite`], returning the result encoded as PNG
    pub fn composite_png(&mut self, foreground: &[u8], background: &[u8]) -> Result<Vec<u8>> {
        let output = self.composite(foreground, background)?;
        encode_png(&output)
    }

    fn segment(&mut self, foreground: &RgbaImage) -> Result<RgbaImage> {
        let _span = tracing::debug_span!("segment", refinement = ?self.config.refinement).entered();

        let cutout = self
            .segmenter
            .segment(foreground, self.config.refinement)
            .map_err(CompositeError::Segmentation)?;

        if cutout.dimensions() != foreground.dimensions() {
            return Err(CompositeError::Segmentation(anyhow::anyhow!(
                "segmenter returned {}x{} for a {}x{} input",
                cutout.width(),
                cutout.height(),
                foreground.width(),
                foreground.height()
            )));
        }

        Ok(cutout)
    }
}

#[derive(Debug, Default)]
struct StageTimings {
    decode: Duration,
    bound: Duration,
    segment: Duration,
    fit: Duration,
    blend: Duration,
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba};
    use std::io::Cursor;

    /// Segmenter returning the input with a fixed alpha chosen per pixel
    struct FixedMask<F: Fn(u32, u32) -> u8> {
        alpha: F,
        calls: Vec<Refinement>,
    }

    impl<F: Fn(u32, u32) -> u8> FixedMask<F> {
        fn new(alpha: F) -> Self {
            Self {
                alpha,
                calls: Vec::new(),
            }
        }
    }

    impl<F: Fn(u32, u32) -> u8> Segmenter for FixedMask<F> {
        fn segment(
            &mut self,
            image: &RgbaImage,
            refinement: Refinement,
        ) -> anyhow::Result<RgbaImage> {
            self.calls.push(refinement);
            let mut output = image.clone();
            for (x, y, pixel) in output.enumerate_pixels_mut() {
                pixel[3] = (self.alpha)(x, y);
            }
            Ok(output)
        }
    }

    struct Failing;

    impl Segmenter for Failing {
        fn segment(&mut self, _: &RgbaImage, _: Refinement) -> anyhow::Result<RgbaImage> {
            bail!("model unavailable")
        }
    }

    struct WrongSize;

    impl Segmenter for WrongSize {
        fn segment(&mut self, image: &RgbaImage, _: Refinement) -> anyhow::Result<RgbaImage> {
            Ok(RgbaImage::new(image.width() + 1, image.height()))
        }
    }

    fn png(image: RgbaImage) -> Vec<u8> {
        encode_png(&image).unwrap()
    }

    fn jpeg(image: RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();
        buffer.into_inner()
    }

    fn subject(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 5 % 256) as u8, (y * 3 % 256) as u8, 90, 255])
        })
    }

    fn scene(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([10, (x % 256) as u8, (y % 256) as u8, 255])
        })
    }

    fn compositor<S: Segmenter>(segmenter: S) -> Compositor<S> {
        Compositor::new(segmenter, CompositorConfig::default()).unwrap()
    }

    #[test]
    fn opaque_cutout_reproduces_foreground() {
        let fg = subject(32, 24);
        let mut compositor = compositor(FixedMask::new(|_, _| 255));
        let output = compositor
            .composite(&png(fg.clone()), &png(scene(32, 24)))
            .unwrap();
        assert_eq!(output, fg);
    }

    #[test]
    fn transparent_cutout_reproduces_resized_background() {
        let bg = scene(50, 10);
        let mut compositor = compositor(FixedMask::new(|_, _| 0));
        let output = compositor
            .composite(&png(subject(32, 24)), &png(bg.clone()))
            .unwrap();
        assert_eq!(output, fit_background(bg, 32, 24));
    }

    #[test]
    fn mask_selects_foreground_or_background_per_pixel() {
        let fg = subject(20, 20);
        let bg = scene(20, 20);
        let mut compositor = compositor(FixedMask::new(|x, _| if x < 10 { 255 } else { 0 }));
        let output = compositor.composite(&png(fg.clone()), &png(bg.clone())).unwrap();

        assert_eq!(output.get_pixel(3, 7), fg.get_pixel(3, 7));
        assert_eq!(output.get_pixel(15, 7), bg.get_pixel(15, 7));
    }

    #[test]
    fn output_takes_foreground_dimensions() {
        let mut compositor = compositor(FixedMask::new(|_, _| 128));
        let output = compositor
            .composite(&png(subject(40, 30)), &png(scene(300, 17)))
            .unwrap();
        assert_eq!(output.dimensions(), (40, 30));
    }

    #[test]
    fn large_foreground_is_downscaled_before_segmentation() {
        let config = CompositorConfig {
            max_dimension: 100,
            ..CompositorConfig::default()
        };
        let mut compositor = Compositor::new(FixedMask::new(|_, _| 255), config).unwrap();
        let output = compositor
            .composite(&png(subject(200, 100)), &png(scene(10, 10)))
            .unwrap();
        assert_eq!(output.dimensions(), (100, 50));
    }

    #[test]
    fn jpeg_inputs_are_accepted() {
        let fg = jpeg(RgbImage::from_pixel(16, 16, Rgb([200, 50, 50])));
        let bg = jpeg(RgbImage::from_pixel(8, 8, Rgb([20, 20, 200])));
        let mut compositor = compositor(FixedMask::new(|_, _| 255));
        let output = compositor.composite(&fg, &bg).unwrap();
        assert_eq!(output.dimensions(), (16, 16));
        assert!(output.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn highest_quality_refinement_is_requested() {
        let mut compositor = compositor(FixedMask::new(|_, _| 255));
        compositor
            .composite(&png(subject(4, 4)), &png(scene(4, 4)))
            .unwrap();
        assert_eq!(compositor.segmenter.calls, vec![Refinement::AlphaMatting]);
    }

    #[test]
    fn configured_refinement_is_passed_through() {
        let config = CompositorConfig {
            refinement: Refinement::None,
            ..CompositorConfig::default()
        };
        let mut compositor = Compositor::new(FixedMask::new(|_, _| 255), config).unwrap();
        compositor
            .composite(&png(subject(4, 4)), &png(scene(4, 4)))
            .unwrap();
        assert_eq!(compositor.segmenter.calls, vec![Refinement::None]);
    }

    #[test]
    fn zero_sized_inputs_fail_before_segmentation() {
        use crate::codec::tests::png_with_header_size;

        let mut compositor = compositor(FixedMask::new(|_, _| 255));

        let err = compositor
            .composite(&png_with_header_size(0, 4), &png(scene(4, 4)))
            .unwrap_err();
        assert!(matches!(
            err,
            CompositeError::Dimension {
                role: Role::Foreground,
                ..
            }
        ));

        let err = compositor
            .composite(&png(subject(4, 4)), &png_with_header_size(5, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            CompositeError::Dimension {
                role: Role::Background,
                ..
            }
        ));
        assert!(compositor.segmenter.calls.is_empty());
    }

    #[test]
    fn empty_inputs_fail_to_decode() {
        let mut compositor = compositor(FixedMask::new(|_, _| 255));

        let err = compositor.composite(&[], &png(scene(4, 4))).unwrap_err();
        assert!(matches!(
            err,
            CompositeError::Decode {
                role: Role::Foreground,
                ..
            }
        ));

        let err = compositor.composite(&png(subject(4, 4)), &[]).unwrap_err();
        assert!(matches!(
            err,
            CompositeError::Decode {
                role: Role::Background,
                ..
            }
        ));
        assert!(compositor.segmenter.calls.is_empty());
    }

    #[test]
    fn segmenter_failure_is_propagated() {
        let mut compositor = compositor(Failing);
        let err = compositor
            .composite(&png(subject(4, 4)), &png(scene(4, 4)))
            .unwrap_err();
        assert!(matches!(err, CompositeError::Segmentation(_)));
        assert!(err.to_string().contains("model unavailable"));
    }

    #[test]
    fn segmenter_size_mismatch_is_rejected() {
        let mut compositor = compositor(WrongSize);
        let err = compositor
            .composite(&png(subject(4, 4)), &png(scene(4, 4)))
            .unwrap_err();
        assert!(matches!(err, CompositeError::Segmentation(_)));
    }

    #[test]
    fn zero_max_dimension_is_invalid() {
        let config = CompositorConfig {
            max_dimension: 0,
            ..CompositorConfig::default()
        };
        assert!(matches!(
            Compositor::new(Failing, config),
            Err(CompositeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn compositing_is_deterministic() {
        let fg = png(subject(30, 20));
        let bg = png(scene(64, 64));
        let mut compositor = compositor(FixedMask::new(|x, y| ((x * 9 + y * 4) % 256) as u8));

        let first = compositor.composite_png(&fg, &bg).unwrap();
        let second = compositor.composite_png(&fg, &bg).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn png_output_round_trips() {
        let mut compositor = compositor(FixedMask::new(|x, _| if x % 2 == 0 { 255 } else { 60 }));
        let fg = png(subject(12, 12));
        let bg = png(scene(12, 12));

        let image = compositor.composite(&fg, &bg).unwrap();
        let bytes = compositor.composite_png(&fg, &bg).unwrap();
        let decoded = crate::codec::decode_rgba(&bytes, Role::Foreground).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn boxed_segmenter_works() {
        let segmenter: Box<dyn Segmenter> = Box::new(FixedMask::new(|_, _| 255));
        let mut compositor = compositor(segmenter);
        let fg = subject(6, 6);
        let output = compositor.composite(&png(fg.clone()), &png(scene(3, 3))).unwrap();
        assert_eq!(output, fg);
    }
}
