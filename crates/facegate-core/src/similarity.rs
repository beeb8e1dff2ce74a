//! Structural similarity (SSIM) between grayscale images.
//!
//! Follows the common reference formulation: a 7x7 uniform window, sample
//! covariance, `K1 = 0.01`, `K2 = 0.03` and an 8-bit data range. The mean is
//! taken over window centres whose window fits entirely inside the image.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use thiserror::Error;

const SSIM_WINDOW: u32 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const SSIM_DATA_RANGE: f64 = 255.0;

// BT.601 luma weights (0.299, 0.587, 0.114) in 14-bit fixed point.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

#[derive(Error, Debug, PartialEq)]
pub enum SimilarityError {
    #[error("image dimensions differ: {0}x{1} vs {2}x{3}")]
    DimensionMismatch(u32, u32, u32, u32),
    #[error("image {0}x{1} is smaller than the 7x7 window")]
    TooSmall(u32, u32),
}

/// Grayscale conversion with BT.601 weights, rounded in fixed point.
///
/// Captured frames and registered images both go through this so that
/// scores do not depend on which decoder produced the pixels.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B
            + (1 << (LUMA_SHIFT - 1)))
            >> LUMA_SHIFT;
        Luma([luma.min(255) as u8])
    })
}

/// Stretch `image` to exactly `width` x `height`.
///
/// The aspect ratio is not preserved. A registered image taken at a
/// different resolution is distorted before scoring, which lowers accuracy
/// but never fails.
pub fn resize_exact(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Score a stored image against a probe, stretching the stored image to the
/// probe's dimensions first.
pub fn score_against(probe: &GrayImage, stored: &GrayImage) -> Result<f32, SimilarityError> {
    let (w, h) = probe.dimensions();
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return Err(SimilarityError::TooSmall(w, h));
    }
    if stored.width() == 0 || stored.height() == 0 {
        return Err(SimilarityError::TooSmall(stored.width(), stored.height()));
    }
    let resized = resize_exact(stored, w, h);
    ssim(probe, &resized)
}

/// Mean SSIM of two equally sized grayscale images, in [-1, 1].
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Result<f32, SimilarityError> {
    let (w, h) = a.dimensions();
    if b.dimensions() != (w, h) {
        return Err(SimilarityError::DimensionMismatch(w, h, b.width(), b.height()));
    }
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return Err(SimilarityError::TooSmall(w, h));
    }

    let tables = IntegralTables::build(a, b);

    let n = (SSIM_WINDOW * SSIM_WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (SSIM_K1 * SSIM_DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * SSIM_DATA_RANGE).powi(2);

    let mut total = 0.0f64;
    let mut count = 0usize;

    // Window top-left corners; centres sit SSIM_WINDOW / 2 pixels in.
    for y in 0..=(h - SSIM_WINDOW) {
        for x in 0..=(w - SSIM_WINDOW) {
            let s = tables.window_sums(x as usize, y as usize, SSIM_WINDOW as usize);

            let ux = s.x / n;
            let uy = s.y / n;
            let vx = cov_norm * (s.xx / n - ux * ux);
            let vy = cov_norm * (s.yy / n - uy * uy);
            let vxy = cov_norm * (s.xy / n - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            count += 1;
        }
    }

    Ok((total / count as f64) as f32)
}

#[derive(Debug, Default)]
struct WindowSums {
    x: f64,
    y: f64,
    xx: f64,
    yy: f64,
    xy: f64,
}

/// Summed-area tables for both images and their products, so every window
/// sum is four lookups.
struct IntegralTables {
    stride: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    xy: Vec<f64>,
}

impl IntegralTables {
    fn build(a: &GrayImage, b: &GrayImage) -> Self {
        let (w, h) = (a.width() as usize, a.height() as usize);
        let stride = w + 1;
        let len = stride * (h + 1);
        let mut t = Self {
            stride,
            x: vec![0.0; len],
            y: vec![0.0; len],
            xx: vec![0.0; len],
            yy: vec![0.0; len],
            xy: vec![0.0; len],
        };

        let (pa, pb) = (a.as_raw(), b.as_raw());
        for row in 0..h {
            let mut rx = 0.0;
            let mut ry = 0.0;
            let mut rxx = 0.0;
            let mut ryy = 0.0;
            let mut rxy = 0.0;
            for col in 0..w {
                let va = pa[row * w + col] as f64;
                let vb = pb[row * w + col] as f64;
                rx += va;
                ry += vb;
                rxx += va * va;
                ryy += vb * vb;
                rxy += va * vb;

                let above = row * stride + col + 1;
                let here = (row + 1) * stride + col + 1;
                t.x[here] = t.x[above] + rx;
                t.y[here] = t.y[above] + ry;
                t.xx[here] = t.xx[above] + rxx;
                t.yy[here] = t.yy[above] + ryy;
                t.xy[here] = t.xy[above] + rxy;
            }
        }
        t
    }

    fn window_sums(&self, x: usize, y: usize, size: usize) -> WindowSums {
        let tl = y * self.stride + x;
        let tr = y * self.stride + x + size;
        let bl = (y + size) * self.stride + x;
        let br = (y + size) * self.stride + x + size;
        let sum = |t: &[f64]| t[br] - t[tr] - t[bl] + t[tl];
        WindowSums {
            x: sum(&self.x),
            y: sum(&self.y),
            xx: sum(&self.xx),
            yy: sum(&self.yy),
            xy: sum(&self.xy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 255) / w.max(1) + y).min(255) as u8]))
    }

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 37 + y * 91 + x * y) % 256) as u8]))
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let a = textured(40, 30);
        let score = ssim(&a, &a).unwrap();
        assert!((score - 1.0).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_ssim_identical_flat_is_one() {
        let a = GrayImage::from_pixel(16, 16, Luma([90]));
        let score = ssim(&a, &a).unwrap();
        assert!((score - 1.0).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_ssim_inverted_is_negative() {
        let a = textured(40, 30);
        let b = GrayImage::from_fn(40, 30, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));
        let score = ssim(&a, &b).unwrap();
        assert!(score < 0.0, "got {score}");
    }

    #[test]
    fn test_ssim_symmetric() {
        let a = textured(24, 24);
        let b = gradient(24, 24);
        let ab = ssim(&a, &b).unwrap();
        let ba = ssim(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_ssim_noise_lowers_score() {
        let a = gradient(32, 32);
        let b = GrayImage::from_fn(32, 32, |x, y| {
            let v = a.get_pixel(x, y)[0] as i32 + if (x + y) % 2 == 0 { 20 } else { -20 };
            Luma([v.clamp(0, 255) as u8])
        });
        let score = ssim(&a, &b).unwrap();
        assert!(score < 1.0 && score > -1.0, "got {score}");
    }

    #[test]
    fn test_ssim_dimension_mismatch() {
        let a = textured(10, 10);
        let b = textured(10, 11);
        assert_eq!(
            ssim(&a, &b),
            Err(SimilarityError::DimensionMismatch(10, 10, 10, 11))
        );
    }

    #[test]
    fn test_ssim_too_small() {
        let a = textured(6, 10);
        assert_eq!(ssim(&a, &a), Err(SimilarityError::TooSmall(6, 10)));
    }

    #[test]
    fn test_ssim_window_exact_fit() {
        let a = textured(7, 7);
        assert!(ssim(&a, &a).is_ok());
    }

    #[test]
    fn test_to_gray_uses_bt601_weights() {
        use image::Rgb;
        let img = RgbImage::from_fn(5, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            2 => Rgb([0, 0, 255]),
            3 => Rgb([255, 255, 255]),
            _ => Rgb([0, 0, 0]),
        });
        let gray = to_gray(&img);
        let values: Vec<u8> = gray.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![76, 150, 29, 255, 0]);
    }

    #[test]
    fn test_resize_exact_ignores_aspect() {
        let a = textured(40, 10);
        let r = resize_exact(&a, 10, 40);
        assert_eq!(r.dimensions(), (10, 40));
    }

    #[test]
    fn test_score_against_stretches_stored_image() {
        let probe = textured(64, 48);
        let stored = resize_exact(&probe, 30, 70);
        let score = score_against(&probe, &stored).unwrap();
        assert!(score.is_finite());
    }

    #[test]
    fn test_score_against_empty_stored_image() {
        let probe = textured(16, 16);
        let stored = GrayImage::new(0, 0);
        assert_eq!(score_against(&probe, &stored), Err(SimilarityError::TooSmall(0, 0)));
    }
}
