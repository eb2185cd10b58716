//! Encoding frames to image files.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::camera::{Camera, CameraError, Frame, PixelFormat};
use crate::error::{Error, Result};
use crate::pixel;

/// JPEG quality used for snapshots.
const JPEG_QUALITY: u8 = 90;

/// Image container written by [`save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// JPEG at a fixed quality.
    #[default]
    Jpeg,
    /// Lossless PNG.
    Png,
    /// Uncompressed BMP.
    Bmp,
}

impl SnapshotFormat {
    /// Canonical file extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
        }
    }

    /// Pick a format from a path's extension, case-insensitively.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }
}

/// Write `frame` to `path`, choosing the encoder from the extension.
///
/// Missing parent directories are created.
///
/// # Errors
///
/// Returns [`CameraError::Unsupported`] (wrapped) for an unknown extension
/// or a YUV420 frame, [`Error::DirectoryCreate`] if the parent cannot be
/// created and [`Error::Image`] if encoding fails.
pub fn save(frame: &Frame, path: &Path) -> Result<()> {
    let format = SnapshotFormat::from_path(path).ok_or_else(|| {
        CameraError::Unsupported(format!(
            "cannot pick an image encoder for {}; use .jpg, .png or .bmp",
            path.display()
        ))
    })?;

    if !frame.is_well_formed() {
        return Err(Error::internal(format!(
            "frame buffer holds {} bytes, expected {} for {} {}",
            frame.data.len(),
            frame.pixel_format.buffer_len(frame.resolution()),
            frame.resolution(),
            frame.pixel_format
        )));
    }

    let (data, color) = match frame.pixel_format {
        PixelFormat::Bgr => {
            let mut rgb = frame.data.clone();
            pixel::swap_red_blue(&mut rgb);
            (rgb, ExtendedColorType::Rgb8)
        }
        PixelFormat::Rgb => (frame.data.clone(), ExtendedColorType::Rgb8),
        PixelFormat::Gray8 => (frame.data.clone(), ExtendedColorType::L8),
        PixelFormat::Yuv420 => {
            return Err(CameraError::Unsupported(
                "YUV420 frames cannot be written as images".to_string(),
            )
            .into())
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match format {
        SnapshotFormat::Jpeg => {
            let mut writer = BufWriter::new(File::create(path)?);
            JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode(
                &data,
                frame.width,
                frame.height,
                color,
            )?;
        }
        SnapshotFormat::Png => image::save_buffer_with_format(
            path,
            &data,
            frame.width,
            frame.height,
            color,
            ImageFormat::Png,
        )?,
        SnapshotFormat::Bmp => image::save_buffer_with_format(
            path,
            &data,
            frame.width,
            frame.height,
            color,
            ImageFormat::Bmp,
        )?,
    }

    debug!(path = %path.display(), resolution = %frame.resolution(), "Snapshot written");
    Ok(())
}

/// Capture a still from `camera` and write it to `path`.
///
/// # Errors
///
/// Propagates capture errors and anything [`save`] returns.
pub fn capture_to<C: Camera + ?Sized>(camera: &mut C, path: &Path) -> Result<Frame> {
    let frame = camera.capture()?;
    save(&frame, path)?;
    Ok(frame)
}

/// `dir/snapshot-YYYYMMDD-HHMMSS-<seq>.<ext>` for a frame.
#[must_use]
pub fn default_snapshot_path(dir: &Path, frame: &Frame, format: SnapshotFormat) -> PathBuf {
    dir.join(format!(
        "snapshot-{}-{:06}.{}",
        frame.captured_at.format("%Y%m%d-%H%M%S"),
        frame.sequence,
        format.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockCamera;
    use chrono::TimeZone;

    /// 2x1 BGR frame: a pure blue pixel then a pure red one.
    fn blue_red() -> Frame {
        Frame::new(vec![255, 0, 0, 0, 0, 255], 2, 1, PixelFormat::Bgr)
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            SnapshotFormat::from_path(Path::new("a/b.JPEG")),
            Some(SnapshotFormat::Jpeg)
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("x.png")),
            Some(SnapshotFormat::Png)
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("x.bmp")),
            Some(SnapshotFormat::Bmp)
        );
        assert_eq!(SnapshotFormat::from_path(Path::new("x.tiff")), None);
        assert_eq!(SnapshotFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_save_png_converts_bgr_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/frame.png");

        save(&blue_red(), &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_save_gray_bmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.bmp");
        let frame = Frame::new(vec![0, 64, 128, 255], 2, 2, PixelFormat::Gray8);

        save(&frame, &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.get_pixel(1, 1).0, [255]);
    }

    #[test]
    fn test_save_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        let frame = Frame::new(vec![40; 16 * 8 * 3], 16, 8, PixelFormat::Rgb);

        save(&frame, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_save_rejects_yuv420() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(vec![0; 6], 2, 2, PixelFormat::Yuv420);

        let err = save(&frame, &dir.path().join("f.png")).unwrap_err();
        assert!(matches!(err, Error::Camera(CameraError::Unsupported(_))));
    }

    #[test]
    fn test_save_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let err = save(&blue_red(), &dir.path().join("f.gif")).unwrap_err();
        assert!(err.to_string().contains("f.gif"));
    }

    #[test]
    fn test_save_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(vec![0; 5], 2, 1, PixelFormat::Bgr);
        assert!(matches!(
            save(&frame, &dir.path().join("f.png")),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_capture_to_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        let mut cam = MockCamera::default();
        cam.open(None).unwrap();

        let frame = capture_to(&mut cam, &path).unwrap();

        assert!(path.exists());
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (frame.width, frame.height));
    }

    #[test]
    fn test_capture_to_requires_open_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = MockCamera::default();
        let err = capture_to(&mut cam, &dir.path().join("x.png")).unwrap_err();
        assert!(matches!(err, Error::Camera(CameraError::State(_))));
    }

    #[test]
    fn test_default_snapshot_path() {
        let mut frame = blue_red().with_sequence(42);
        frame.captured_at = chrono::Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap();

        let path = default_snapshot_path(Path::new("/tmp/snaps"), &frame, SnapshotFormat::Png);
        assert_eq!(
            path,
            PathBuf::from("/tmp/snaps/snapshot-20240309-140507-000042.png")
        );
    }
}
