use super::refine;
use super::types::{apply_matte, Matte, Refinement, Segmenter};
use anyhow::Result;
use image::RgbaImage;
use std::collections::{HashMap, VecDeque};

/// Width of the border strip sampled for the backdrop colour
const EDGE_SAMPLE_WIDTH: u32 = 5;

/// Model-free segmenter that keys out a uniform backdrop
///
/// The most common border colour is taken as the backdrop. Pixels within
/// `tolerance` of it that are connected to the image border become
/// transparent, so subject pixels of a similar colour enclosed by the
/// subject survive.
///
/// An image that is one colour edge to edge has no subject to keep: it is
/// keyed out completely and the composite shows only the background.
pub struct ColorKeySegmenter {
    tolerance: u32,
}

impl ColorKeySegmenter {
    /// `tolerance` is the largest sum of absolute RGB differences still
    /// considered backdrop
    pub fn new(tolerance: u32) -> Self {
        Self { tolerance }
    }

    fn key_matte(&self, image: &RgbaImage) -> Matte {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let mut matte = vec![1.0; w * h];

        let Some(key) = dominant_edge_color(image) else {
            return matte;
        };
        tracing::debug!("Backdrop colour {:?}, tolerance {}", key, self.tolerance);

        let is_backdrop = |x: u32, y: u32| {
            let p = image.get_pixel(x, y);
            color_distance([p[0], p[1], p[2]], key) <= self.tolerance
        };

        // Flood fill from every border pixel that matches the key
        let mut visited = vec![false; w * h];
        let mut queue = VecDeque::new();
        for x in 0..width {
            queue.push_back((x, 0));
            queue.push_back((x, height - 1));
        }
        for y in 0..height {
            queue.push_back((0, y));
            queue.push_back((width - 1, y));
        }

        while let Some((x, y)) = queue.pop_front() {
            let idx = y as usize * w + x as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            if !is_backdrop(x, y) {
                continue;
            }
            matte[idx] = 0.0;

            if x > 0 {
                queue.push_back((x - 1, y));
            }
            if x + 1 < width {
                queue.push_back((x + 1, y));
            }
            if y > 0 {
                queue.push_back((x, y - 1));
            }
            if y + 1 < height {
                queue.push_back((x, y + 1));
            }
        }

        matte
    }
}

impl Segmenter for ColorKeySegmenter {
    fn segment(&mut self, image: &RgbaImage, refinement: Refinement) -> Result<RgbaImage> {
        let _span = tracing::debug_span!("color_key_segment").entered();

        let (width, height) = image.dimensions();
        let matte = self.key_matte(image);
        let matte = match refinement {
            Refinement::None => matte,
            Refinement::AlphaMatting => refine::refine_matte(&matte, width, height),
        };

        Ok(apply_matte(image, &matte))
    }
}

/// Most frequent colour along the image border, quantized to 16 levels per channel
///
/// Returns the average of the exact colours that fell into the winning bucket.
fn dominant_edge_color(image: &RgbaImage) -> Option<[u8; 3]> {
    let (width, height) = image.dimensions();
    let band = EDGE_SAMPLE_WIDTH.min(width).min(height);
    let mut buckets: HashMap<[u8; 3], (usize, [u64; 3])> = HashMap::new();

    for (x, y, pixel) in image.enumerate_pixels() {
        let on_edge = x < band || y < band || x >= width - band || y >= height - band;
        if !on_edge {
            continue;
        }
        let key = [pixel[0] / 16, pixel[1] / 16, pixel[2] / 16];
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        for c in 0..3 {
            entry.1[c] += pixel[c] as u64;
        }
    }

    buckets
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(&a.0)))
        .map(|(_, (count, sums))| {
            let n = count as u64;
            [
                ((sums[0] + n / 2) / n) as u8,
                ((sums[1] + n / 2) / n) as u8,
                ((sums[2] + n / 2) / n) as u8,
            ]
        })
}

/// Sum of absolute RGB differences
fn color_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(&b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);
    const RED: Rgba<u8> = Rgba([220, 10, 10, 255]);

    /// Green screen with a red ring whose hole is also green
    fn ring_on_green() -> RgbaImage {
        RgbaImage::from_fn(30, 30, |x, y| {
            let inside_ring = (8..22).contains(&x) && (8..22).contains(&y);
            let hole = (12..18).contains(&x) && (12..18).contains(&y);
            if inside_ring && !hole {
                RED
            } else {
                GREEN
            }
        })
    }

    #[test]
    fn detects_border_color() {
        assert_eq!(dominant_edge_color(&ring_on_green()), Some([0, 200, 0]));
    }

    #[test]
    fn keys_out_connected_backdrop_only() {
        let mut segmenter = ColorKeySegmenter::new(30);
        let output = segmenter
            .segment(&ring_on_green(), Refinement::None)
            .unwrap();

        assert_eq!(output.dimensions(), (30, 30));
        assert_eq!(output.get_pixel(0, 0)[3], 0);
        assert_eq!(output.get_pixel(10, 10)[3], 255);
        // enclosed green hole is not reachable from the border
        assert_eq!(output.get_pixel(15, 15)[3], 255);
        assert_eq!(&output.get_pixel(0, 0).0[..3], &GREEN.0[..3]);
    }

    #[test]
    fn tolerance_controls_keying() {
        let image = RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgba([0, 200, 0, 255])
            } else {
                Rgba([0, 180, 0, 255])
            }
        });

        let strict = ColorKeySegmenter::new(5)
            .segment(&image, Refinement::None)
            .unwrap();
        let loose = ColorKeySegmenter::new(40)
            .segment(&image, Refinement::None)
            .unwrap();

        let strict_cleared = strict.pixels().filter(|p| p[3] == 0).count();
        let loose_cleared = loose.pixels().filter(|p| p[3] == 0).count();
        assert_eq!(strict_cleared, 50);
        assert_eq!(loose_cleared, 100);
    }

    #[test]
    fn uniform_image_is_keyed_out_entirely() {
        let image = RgbaImage::from_pixel(6, 4, RED);
        let output = ColorKeySegmenter::new(30)
            .segment(&image, Refinement::None)
            .unwrap();
        assert!(output.pixels().all(|p| p[3] == 0));

        let single = RgbaImage::from_pixel(1, 1, RED);
        let output = ColorKeySegmenter::new(30)
            .segment(&single, Refinement::None)
            .unwrap();
        assert_eq!(output.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn alpha_matting_keeps_dimensions() {
        let output = ColorKeySegmenter::new(30)
            .segment(&ring_on_green(), Refinement::AlphaMatting)
            .unwrap();
        assert_eq!(output.dimensions(), (30, 30));
        assert_eq!(output.get_pixel(0, 0)[3], 0);
    }
}
