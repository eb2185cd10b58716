//! Pixel format conversion.
//!
//! Everything funnels through packed BGR24, the layout frames are normalised
//! to. Conversions use BT.601 integer arithmetic.

use image::ImageFormat;

use crate::camera::{CameraError, PixelFormat, Resolution};

#[inline]
fn clamp_u8(v: i32) -> u8 {
    // Truncation is intended after the clamp.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let out = v.clamp(0, 255) as u8;
    out
}

#[inline]
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [clamp_u8(b), clamp_u8(g), clamp_u8(r)]
}

#[inline]
fn bgr_to_yuv(b: u8, g: u8, r: u8) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

/// Convert packed YUYV (4:2:2) to BGR24.
///
/// # Errors
///
/// Returns [`CameraError::Device`] if the buffer is shorter than the
/// resolution requires or the width is odd.
pub fn yuyv_to_bgr(data: &[u8], resolution: Resolution) -> Result<Vec<u8>, CameraError> {
    if resolution.width % 2 != 0 {
        return Err(CameraError::device(format!(
            "YUYV frame width must be even, got {}",
            resolution.width
        )));
    }
    let needed = resolution.pixels() * 2;
    if data.len() < needed {
        return Err(CameraError::device(format!(
            "short YUYV buffer: {} bytes, expected {needed} for {resolution}",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(resolution.pixels() * 3);
    for chunk in data[..needed].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        out.extend_from_slice(&yuv_to_bgr(y0, u, v));
        out.extend_from_slice(&yuv_to_bgr(y1, u, v));
    }
    Ok(out)
}

/// Decode one MJPEG buffer to BGR24.
///
/// # Errors
///
/// Returns [`CameraError::Device`] if the JPEG cannot be decoded.
pub fn mjpeg_to_bgr(data: &[u8]) -> Result<(Vec<u8>, Resolution), CameraError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| CameraError::device(format!("MJPEG decode failed: {e}")))?
        .into_rgb8();
    let resolution = Resolution::new(image.width(), image.height());
    let mut data = image.into_raw();
    swap_red_blue(&mut data);
    Ok((data, resolution))
}

/// Swap the first and third byte of every pixel (BGR <-> RGB) in place.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Convert BGR24 to 8-bit luminance.
#[must_use]
pub fn bgr_to_gray(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .map(|px| {
            let (b, g, r) = (u32::from(px[0]), u32::from(px[1]), u32::from(px[2]));
            // Weights sum to 256, so the result always fits.
            #[allow(clippy::cast_possible_truncation)]
            let y = ((29 * b + 150 * g + 77 * r + 128) >> 8) as u8;
            y
        })
        .collect()
}

/// Convert BGR24 to planar I420.
///
/// Chroma is taken from the top-left pixel of each 2x2 block.
#[must_use]
pub fn bgr_to_i420(data: &[u8], resolution: Resolution) -> Vec<u8> {
    let (w, h) = (resolution.width as usize, resolution.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut y_plane = Vec::with_capacity(w * h);
    let mut u_plane = vec![0u8; cw * ch];
    let mut v_plane = vec![0u8; cw * ch];

    for row in 0..h {
        for col in 0..w {
            let i = (row * w + col) * 3;
            let (y, u, v) = bgr_to_yuv(data[i], data[i + 1], data[i + 2]);
            y_plane.push(y);
            if row % 2 == 0 && col % 2 == 0 {
                let c = (row / 2) * cw + col / 2;
                u_plane[c] = u;
                v_plane[c] = v;
            }
        }
    }

    y_plane.extend_from_slice(&u_plane);
    y_plane.extend_from_slice(&v_plane);
    y_plane
}

/// Convert a BGR24 buffer into `target`.
#[must_use]
pub fn from_bgr(mut data: Vec<u8>, resolution: Resolution, target: PixelFormat) -> Vec<u8> {
    match target {
        PixelFormat::Bgr => data,
        PixelFormat::Rgb => {
            swap_red_blue(&mut data);
            data
        }
        PixelFormat::Gray8 => bgr_to_gray(&data),
        PixelFormat::Yuv420 => bgr_to_i420(&data, resolution),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // Limited-range black (Y=16) and white (Y=235), neutral chroma.
        let data = [16, 128, 235, 128];
        let bgr = yuyv_to_bgr(&data, Resolution::new(2, 1)).unwrap();
        assert_eq!(&bgr[..3], &[0, 0, 0]);
        assert_eq!(&bgr[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // Strong V pushes red up and blue stays low.
        let bgr = yuyv_to_bgr(&[82, 90, 82, 240], Resolution::new(2, 1)).unwrap();
        assert!(bgr[2] > 200, "red channel was {}", bgr[2]);
        assert!(bgr[0] < 60, "blue channel was {}", bgr[0]);
    }

    #[test]
    fn test_yuyv_rejects_short_buffer() {
        let err = yuyv_to_bgr(&[0; 6], Resolution::new(2, 2)).unwrap_err();
        assert!(err.to_string().contains("short YUYV buffer"));
    }

    #[test]
    fn test_yuyv_rejects_odd_width() {
        assert!(yuyv_to_bgr(&[0; 6], Resolution::new(3, 1)).is_err());
    }

    #[test]
    fn test_swap_red_blue() {
        let mut px = vec![1, 2, 3, 4, 5, 6];
        swap_red_blue(&mut px);
        assert_eq!(px, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_bgr_to_gray() {
        let gray = bgr_to_gray(&[0, 0, 0, 255, 255, 255, 0, 255, 0]);
        assert_eq!(gray[0], 0);
        assert_eq!(gray[1], 255);
        assert!(gray[2] > 140 && gray[2] < 160);
    }

    #[test]
    fn test_bgr_to_i420_layout() {
        let res = Resolution::new(4, 2);
        let bgr = vec![255u8; res.pixels() * 3];
        let yuv = bgr_to_i420(&bgr, res);
        assert_eq!(yuv.len(), PixelFormat::Yuv420.buffer_len(res));
        assert!(yuv[..8].iter().all(|&y| y == 235));
        assert!(yuv[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_bgr_to_i420_odd_size() {
        let res = Resolution::new(3, 3);
        let yuv = bgr_to_i420(&vec![0u8; res.pixels() * 3], res);
        assert_eq!(yuv.len(), PixelFormat::Yuv420.buffer_len(res));
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
            .encode_image(&img)
            .unwrap();

        let (bgr, res) = mjpeg_to_bgr(&jpeg).unwrap();
        assert_eq!(res, Resolution::new(8, 4));
        assert_eq!(bgr.len(), 8 * 4 * 3);
        // Red in RGB lands in the third byte after conversion.
        assert!(bgr[2] > 150 && bgr[0] < 80);
    }

    #[test]
    fn test_mjpeg_garbage() {
        assert!(mjpeg_to_bgr(b"not a jpeg").is_err());
    }

    #[test]
    fn test_from_bgr_targets() {
        let res = Resolution::new(2, 1);
        let bgr = vec![10, 20, 30, 40, 50, 60];
        assert_eq!(from_bgr(bgr.clone(), res, PixelFormat::Bgr), bgr);
        assert_eq!(
            from_bgr(bgr.clone(), res, PixelFormat::Rgb),
            vec![30, 20, 10, 60, 50, 40]
        );
        assert_eq!(from_bgr(bgr.clone(), res, PixelFormat::Gray8).len(), 2);
        assert_eq!(
            from_bgr(bgr, res, PixelFormat::Yuv420).len(),
            PixelFormat::Yuv420.buffer_len(res)
        );
    }
}
