//! Frame type and image processing: YUYV/GREY/MJPG conversion, overlay boxes.

use image::{Rgb, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share the
/// chroma pair. Uses BT.601 limited-range coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

/// Expand 8-bit grayscale (native IR / GREY output) to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = grey[(y * width + x) as usize];
        Rgb([v, v, v])
    }))
}

/// Decode a Motion-JPEG buffer to RGB.
pub fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, FrameError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    Ok(img.into_rgb8())
}

/// Draw a rectangle outline of the given thickness, clipped to the image.
pub fn draw_rect(image: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>, thickness: u32) {
    if w == 0 || h == 0 || thickness == 0 {
        return;
    }
    let (iw, ih) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x as i64, y as i64);
    let (x1, y1) = (x0 + w as i64 - 1, y0 + h as i64 - 1);
    let t = thickness as i64;

    let mut put = |px: i64, py: i64| {
        if px >= 0 && py >= 0 && px < iw && py < ih {
            image.put_pixel(px as u32, py as u32, color);
        }
    };

    for py in y0..=y1 {
        for px in x0..=x1 {
            let on_edge = px - x0 < t || x1 - px < t || py - y0 < t || y1 - py < t;
            if on_edge {
                put(px, py);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=16 (black), U=128, Y1=235 (white), V=128]
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > 200 && p[1] < 40 && p[2] < 40, "{p:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let grey = vec![0, 50, 100, 150];
        let rgb = grey_to_rgb(&grey, 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([150, 150, 150]));
        assert!(grey_to_rgb(&grey, 3, 2).is_err());
    }

    #[test]
    fn test_decode_mjpeg_roundtrip_dimensions() {
        let src = RgbImage::from_pixel(16, 8, Rgb([200, 40, 40]));
        let mut buf = std::io::Cursor::new(Vec::new());
        src.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();

        let decoded = decode_mjpeg(buf.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_decode_mjpeg_garbage() {
        assert!(matches!(decode_mjpeg(b"nope"), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut img = RgbImage::new(10, 10);
        let green = Rgb([0, 255, 0]);
        draw_rect(&mut img, 2, 2, 6, 6, green, 1);

        assert_eq!(img.get_pixel(2, 2), &green);
        assert_eq!(img.get_pixel(7, 7), &green);
        assert_eq!(img.get_pixel(2, 5), &green);
        assert_eq!(img.get_pixel(4, 4), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(8, 8), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_rect_clipped() {
        let mut img = RgbImage::new(8, 8);
        let green = Rgb([0, 255, 0]);
        draw_rect(&mut img, -5, -5, 20, 20, green, 2);
        // Every edge lies outside the image; only clipping happens.
        assert_eq!(img.get_pixel(4, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::new(RgbImage::from_pixel(4, 3, Rgb([90, 90, 90])), 7);
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.sequence, 7);
    }
}
