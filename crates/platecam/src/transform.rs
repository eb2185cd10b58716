//! Frame orientation and region-of-interest cropping.
//!
//! Drivers that cannot rotate, mirror or crop in hardware leave it to this
//! layer. Works on packed formats (BGR, RGB, GRAY8); planar YUV is rejected.

use std::ops::Range;

use crate::camera::{validate_roi, CameraError, Frame, PixelFormat, Resolution, Result};

/// Orientation applied after capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotation_deg: u16,
    /// Mirror left-right (applied before rotation).
    pub hflip: bool,
    /// Mirror top-bottom (applied before rotation).
    pub vflip: bool,
}

impl Orientation {
    /// Whether this orientation leaves frames unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rotation_deg == 0 && !self.hflip && !self.vflip
    }

    /// Size of a `resolution` frame after this orientation.
    #[must_use]
    pub fn output_size(&self, resolution: Resolution) -> Resolution {
        match self.rotation_deg {
            90 | 270 => Resolution::new(resolution.height, resolution.width),
            _ => resolution,
        }
    }
}

fn bytes_per_pixel(format: PixelFormat) -> Result<usize> {
    match format {
        PixelFormat::Bgr | PixelFormat::Rgb => Ok(3),
        PixelFormat::Gray8 => Ok(1),
        PixelFormat::Yuv420 => Err(CameraError::Unsupported(
            "orientation and cropping need a packed pixel format, got YUV420".to_string(),
        )),
    }
}

/// Rotate and/or mirror a frame.
///
/// # Errors
///
/// Returns [`CameraError::InvalidConfig`] for a rotation other than
/// 0/90/180/270 and [`CameraError::Unsupported`] for planar frames.
pub fn apply_orientation(frame: &Frame, orientation: Orientation) -> Result<Frame> {
    if !matches!(orientation.rotation_deg, 0 | 90 | 180 | 270) {
        return Err(CameraError::InvalidConfig(format!(
            "rotation must be 0, 90, 180 or 270 degrees, got {}",
            orientation.rotation_deg
        )));
    }
    if orientation.is_identity() {
        return Ok(frame.clone());
    }

    let bpp = bytes_per_pixel(frame.pixel_format)?;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (out_w, out_h) = match orientation.rotation_deg {
        90 | 270 => (h, w),
        _ => (w, h),
    };

    let mut data = vec![0u8; frame.data.len()];
    for y in 0..h {
        for x in 0..w {
            // Mirror in source space first.
            let sx = if orientation.hflip { w - 1 - x } else { x };
            let sy = if orientation.vflip { h - 1 - y } else { y };
            let (dx, dy) = match orientation.rotation_deg {
                90 => (h - 1 - y, x),
                180 => (w - 1 - x, h - 1 - y),
                270 => (y, w - 1 - x),
                _ => (x, y),
            };
            let src = (sy * w + sx) * bpp;
            let dst = (dy * out_w + dx) * bpp;
            data[dst..dst + bpp].copy_from_slice(&frame.data[src..src + bpp]);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let (width, height) = (out_w as u32, out_h as u32);
    Ok(Frame {
        data,
        width,
        height,
        ..frame.clone_meta()
    })
}

/// Crop a frame to a normalised region of interest.
///
/// The crop is clamped to the frame bounds.
///
/// # Errors
///
/// Returns [`CameraError::InvalidConfig`] if the ROI is out of range or
/// rounds down to nothing, [`CameraError::Unsupported`] for planar frames.
pub fn crop_roi(frame: &Frame, roi: (f64, f64, f64, f64)) -> Result<Frame> {
    let bpp = bytes_per_pixel(frame.pixel_format)?;
    let (xs, ys) = roi_pixels(roi, frame.resolution())?;
    let (x0, x1, y0, y1) = (xs.start, xs.end, ys.start, ys.end);

    let stride = frame.width as usize * bpp;
    let row_len = (x1 - x0) * bpp;
    let mut data = Vec::with_capacity(row_len * (y1 - y0));
    for row in y0..y1 {
        let start = row * stride + x0 * bpp;
        data.extend_from_slice(&frame.data[start..start + row_len]);
    }

    #[allow(clippy::cast_possible_truncation)]
    let (width, height) = ((x1 - x0) as u32, (y1 - y0) as u32);
    Ok(Frame {
        data,
        width,
        height,
        ..frame.clone_meta()
    })
}

/// Pixel columns and rows a normalised ROI covers on a `resolution` frame.
///
/// # Errors
///
/// Returns [`CameraError::InvalidConfig`] if the ROI is out of range or
/// rounds down to nothing at this resolution.
pub fn roi_pixels(
    roi: (f64, f64, f64, f64),
    resolution: Resolution,
) -> Result<(Range<usize>, Range<usize>)> {
    validate_roi(roi)?;
    let (x, y, w, h) = roi;

    let span = |start: f64, len: f64, size: u32| -> Range<usize> {
        let size_f = f64::from(size);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lo = (start * size_f).floor().clamp(0.0, size_f) as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let hi = ((start + len) * size_f).round().clamp(0.0, size_f) as usize;
        lo..hi
    };
    let xs = span(x, w, resolution.width);
    let ys = span(y, h, resolution.height);
    if xs.is_empty() || ys.is_empty() {
        return Err(CameraError::InvalidConfig(format!(
            "roi ({x}, {y}, {w}, {h}) is empty on a {resolution} frame"
        )));
    }
    Ok((xs, ys))
}

/// Orient, then crop if a ROI is given.
///
/// # Errors
///
/// See [`apply_orientation`] and [`crop_roi`].
pub fn prepare(
    frame: &Frame,
    orientation: Orientation,
    roi: Option<(f64, f64, f64, f64)>,
) -> Result<Frame> {
    let oriented = apply_orientation(frame, orientation)?;
    match roi {
        Some(roi) => crop_roi(&oriented, roi),
        None => Ok(oriented),
    }
}

impl Frame {
    /// Copy of everything but the pixel buffer.
    fn clone_meta(&self) -> Frame {
        Frame {
            data: Vec::new(),
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixel_format: self.pixel_format,
            timestamp: self.timestamp,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }
}
