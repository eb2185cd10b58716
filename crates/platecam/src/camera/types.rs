//! Data types shared by every camera driver.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CameraError;

/// Image resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether either dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CameraError::InvalidConfig(format!("invalid resolution '{s}'"));
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Ok(Self { width, height })
    }
}

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit blue, green, red.
    #[default]
    #[serde(rename = "BGR")]
    Bgr,
    /// Packed 8-bit red, green, blue.
    #[serde(rename = "RGB")]
    Rgb,
    /// Single 8-bit luminance channel.
    #[serde(rename = "GRAY8")]
    Gray8,
    /// Planar YUV 4:2:0 (I420), chroma planes rounded up for odd sizes.
    #[serde(rename = "YUV420")]
    Yuv420,
}

impl PixelFormat {
    /// Number of colour channels as reported in [`Frame::channels`].
    #[must_use]
    pub const fn channels(self) -> u8 {
        match self {
            Self::Bgr | Self::Rgb => 3,
            Self::Gray8 | Self::Yuv420 => 1,
        }
    }

    /// Buffer size in bytes for a frame of the given resolution.
    #[must_use]
    pub fn buffer_len(self, resolution: Resolution) -> usize {
        let pixels = resolution.pixels();
        match self {
            Self::Bgr | Self::Rgb => pixels * 3,
            Self::Gray8 => pixels,
            Self::Yuv420 => {
                let chroma = resolution.width.div_ceil(2) as usize
                    * resolution.height.div_ceil(2) as usize;
                pixels + 2 * chroma
            }
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bgr => write!(f, "BGR"),
            Self::Rgb => write!(f, "RGB"),
            Self::Gray8 => write!(f, "GRAY8"),
            Self::Yuv420 => write!(f, "YUV420"),
        }
    }
}

/// A normalised frame as delivered by any driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw pixel buffer in `pixel_format` layout, row-major, no padding.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Number of colour channels.
    pub channels: u8,
    /// Pixel layout of `data`.
    pub pixel_format: PixelFormat,
    /// Monotonic capture time.
    pub timestamp: Instant,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Per-driver frame counter.
    pub sequence: u64,
}

impl Frame {
    /// Create a frame stamped with the current time.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            channels: pixel_format.channels(),
            pixel_format,
            timestamp: Instant::now(),
            captured_at: Utc::now(),
            sequence: 0,
        }
    }

    /// Set the sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// The frame's resolution.
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Whether `data` has exactly the size its format and resolution imply.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.pixel_format.buffer_len(self.resolution())
    }
}

/// Generic camera configuration.
///
/// Backends may ignore fields they cannot honour but must reflect what they
/// actually applied in `Camera::current_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture resolution.
    pub resolution: Resolution,
    /// Frames per second.
    pub framerate: f64,
    /// Output pixel layout.
    pub pixel_format: PixelFormat,
    /// Rotation in degrees: 0, 90, 180 or 270.
    pub rotation_deg: u16,
    /// Mirror horizontally.
    pub hflip: bool,
    /// Mirror vertically.
    pub vflip: bool,

    /// Automatic exposure.
    pub auto_exposure: bool,
    /// Manual exposure time; ignored when `auto_exposure` is set.
    pub exposure_time_us: Option<u32>,
    /// Sensor ISO, if supported.
    pub iso: Option<u32>,

    /// Automatic white balance.
    pub auto_white_balance: bool,
    /// Manual red gain.
    pub white_balance_gain_r: Option<f64>,
    /// Manual blue gain.
    pub white_balance_gain_b: Option<f64>,

    /// Automatic focus.
    pub auto_focus: bool,
    /// Manual focus distance in metres.
    pub focus_distance_m: Option<f64>,

    /// Region of interest `(x, y, w, h)` in normalised `[0, 1]` coordinates.
    pub roi_norm: Option<(f64, f64, f64, f64)>,
}

/// Slowest frame rate a camera may be configured for.
pub const MIN_FRAMERATE: f64 = 0.001;

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            framerate: 30.0,
            pixel_format: PixelFormat::Bgr,
            rotation_deg: 0,
            hflip: false,
            vflip: false,
            auto_exposure: true,
            exposure_time_us: None,
            iso: None,
            auto_white_balance: true,
            white_balance_gain_r: None,
            white_balance_gain_b: None,
            auto_focus: true,
            focus_distance_m: None,
            roi_norm: None,
        }
    }
}

impl CameraConfig {
    /// Check that every field is within range.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.resolution.is_empty() {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {} has a zero dimension",
                self.resolution
            )));
        }
        if !(self.framerate.is_finite() && self.framerate >= MIN_FRAMERATE) {
            return Err(CameraError::InvalidConfig(format!(
                "framerate must be at least {MIN_FRAMERATE}, got {}",
                self.framerate
            )));
        }
        if !matches!(self.rotation_deg, 0 | 90 | 180 | 270) {
            return Err(CameraError::InvalidConfig(format!(
                "rotation must be 0, 90, 180 or 270 degrees, got {}",
                self.rotation_deg
            )));
        }
        if let Some(roi) = self.roi_norm {
            validate_roi(roi)?;
        }
        for (name, gain) in [
            ("white_balance_gain_r", self.white_balance_gain_r),
            ("white_balance_gain_b", self.white_balance_gain_b),
        ] {
            if let Some(g) = gain {
                if !(g.is_finite() && g > 0.0) {
                    return Err(CameraError::InvalidConfig(format!(
                        "{name} must be positive, got {g}"
                    )));
                }
            }
        }
        if let Some(d) = self.focus_distance_m {
            if !(d.is_finite() && d > 0.0) {
                return Err(CameraError::InvalidConfig(format!(
                    "focus_distance_m must be positive, got {d}"
                )));
            }
        }
        Ok(())
    }
}

/// Check a normalised ROI: inside `[0, 1]` and non-empty.
///
/// # Errors
///
/// Returns [`CameraError::InvalidConfig`] if the ROI is out of range.
pub fn validate_roi((x, y, w, h): (f64, f64, f64, f64)) -> Result<(), CameraError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    if !(in_unit(x) && in_unit(y) && in_unit(w) && in_unit(h)) {
        return Err(CameraError::InvalidConfig(format!(
            "roi ({x}, {y}, {w}, {h}) must lie within [0, 1]"
        )));
    }
    if w <= 0.0 || h <= 0.0 {
        return Err(CameraError::InvalidConfig(format!(
            "roi ({x}, {y}, {w}, {h}) is empty"
        )));
    }
    if x + w > 1.0 + f64::EPSILON || y + h > 1.0 + f64::EPSILON {
        return Err(CameraError::InvalidConfig(format!(
            "roi ({x}, {y}, {w}, {h}) extends past the frame"
        )));
    }
    Ok(())
}

/// Exposure controls a backend offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureCaps {
    /// Automatic exposure available.
    pub auto: bool,
    /// Manual exposure time available.
    pub manual: bool,
    /// Shortest manual exposure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_us: Option<u32>,
    /// Longest manual exposure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_us: Option<u32>,
}

/// White balance controls a backend offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteBalanceCaps {
    /// Automatic white balance available.
    pub auto: bool,
    /// Manual red/blue gains available.
    pub manual_gains: bool,
}

/// Focus controls a backend offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusCaps {
    /// Autofocus available.
    pub auto: bool,
    /// Manual focus distance available.
    pub manual_distance: bool,
}

/// Controls grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    /// Exposure.
    pub exposure: ExposureCaps,
    /// White balance.
    #[serde(rename = "wb")]
    pub white_balance: WhiteBalanceCaps,
    /// Focus.
    pub focus: FocusCaps,
}

/// What a backend can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supported capture resolutions.
    pub resolutions: Vec<Resolution>,
    /// Pixel layouts frames can be delivered in.
    pub pixel_formats: Vec<PixelFormat>,
    /// Supported controls.
    pub controls: Controls,
    /// Whether the backend crops to `roi_norm` itself.
    pub roi_supported: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_display_and_parse() {
        let r = Resolution::new(640, 480);
        assert_eq!(r.to_string(), "640x480");
        assert_eq!("640x480".parse::<Resolution>().unwrap(), r);
        assert_eq!(" 1920 X 1080 ".trim().parse::<Resolution>().unwrap().width, 1920);
        assert!("640".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_pixel_format_channels() {
        assert_eq!(PixelFormat::Bgr.channels(), 3);
        assert_eq!(PixelFormat::Rgb.channels(), 3);
        assert_eq!(PixelFormat::Gray8.channels(), 1);
        assert_eq!(PixelFormat::Yuv420.channels(), 1);
    }

    #[test]
    fn test_pixel_format_buffer_len() {
        let r = Resolution::new(4, 2);
        assert_eq!(PixelFormat::Bgr.buffer_len(r), 24);
        assert_eq!(PixelFormat::Gray8.buffer_len(r), 8);
        assert_eq!(PixelFormat::Yuv420.buffer_len(r), 12);
        assert_eq!(PixelFormat::Yuv420.buffer_len(Resolution::new(3, 3)), 9 + 2 * 4);
    }

    #[test]
    fn test_pixel_format_serde_names() {
        assert_eq!(serde_json::to_string(&PixelFormat::Gray8).unwrap(), "\"GRAY8\"");
        let f: PixelFormat = serde_json::from_str("\"BGR\"").unwrap();
        assert_eq!(f, PixelFormat::Bgr);
        assert_eq!(PixelFormat::Yuv420.to_string(), "YUV420");
    }

    #[test]
    fn test_frame_new() {
        let frame = Frame::new(vec![0; 12], 2, 2, PixelFormat::Bgr).with_sequence(7);
        assert_eq!(frame.channels, 3);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.resolution(), Resolution::new(2, 2));
        assert!(frame.is_well_formed());

        let short = Frame::new(vec![0; 5], 2, 2, PixelFormat::Bgr);
        assert!(!short.is_well_formed());
    }

    #[test]
    fn test_camera_config_default() {
        let cfg = CameraConfig::default();
        assert_eq!(cfg.resolution, Resolution::new(1280, 720));
        assert!((cfg.framerate - 30.0).abs() < f64::EPSILON);
        assert_eq!(cfg.pixel_format, PixelFormat::Bgr);
        assert!(cfg.auto_exposure && cfg.auto_white_balance && cfg.auto_focus);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_camera_config_rejects_bad_values() {
        let mut cfg = CameraConfig::default();
        cfg.rotation_deg = 45;
        assert!(cfg.validate().unwrap_err().to_string().contains("rotation"));

        let mut cfg = CameraConfig::default();
        cfg.framerate = 0.0;
        assert!(cfg.validate().unwrap_err().to_string().contains("framerate"));

        let mut cfg = CameraConfig::default();
        cfg.framerate = 1e-20;
        assert!(cfg.validate().unwrap_err().to_string().contains("framerate"));
        cfg.framerate = MIN_FRAMERATE;
        assert!(cfg.validate().is_ok());

        let mut cfg = CameraConfig::default();
        cfg.resolution = Resolution::new(0, 480);
        assert!(cfg.validate().is_err());

        let mut cfg = CameraConfig::default();
        cfg.white_balance_gain_r = Some(-1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_roi() {
        assert!(validate_roi((0.0, 0.0, 1.0, 1.0)).is_ok());
        assert!(validate_roi((0.25, 0.5, 0.5, 0.5)).is_ok());
        assert!(validate_roi((0.5, 0.5, 0.0, 0.5)).is_err());
        assert!(validate_roi((-0.1, 0.0, 0.5, 0.5)).is_err());
        assert!(validate_roi((0.6, 0.0, 0.6, 0.5)).is_err());
    }

    #[test]
    fn test_capabilities_json_shape() {
        let caps = Capabilities {
            resolutions: vec![Resolution::new(640, 480)],
            pixel_formats: vec![PixelFormat::Bgr],
            controls: Controls::default(),
            roi_supported: false,
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["resolutions"][0]["width"], 640);
        assert_eq!(json["pixel_formats"][0], "BGR");
        assert!(json["controls"]["wb"].is_object());
        assert_eq!(json["roi_supported"], false);
    }
}
