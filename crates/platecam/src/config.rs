//! Configuration management for platecam.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::camera::{Resolution, MIN_FRAMERATE};
use crate::error::{Error, Result};
use crate::factory::{DriverKind, HardwareConfig};
use crate::snapshot::SnapshotFormat;
use crate::transform::{self, Orientation};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "platecam";

/// Prefix for environment overrides, e.g. `PLATECAM_CAMERA__DRIVER=mock`.
pub const ENV_PREFIX: &str = "PLATECAM_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `PLATECAM_`, sections split by `__`)
/// 2. TOML config file at `~/.config/platecam/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which camera to use and how to orient its frames.
    pub camera: CameraSettings,
    /// Capture loop and snapshot settings.
    pub capture: CaptureConfig,
}

/// Camera selection and orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Active driver.
    pub driver: DriverKind,
    /// Device index (`/dev/videoN`).
    pub device_index: u32,
    /// Resolution applied when the camera is opened.
    pub default_resolution: Resolution,
    /// Frame rate applied when the camera is opened.
    pub default_framerate: f64,
    /// Clockwise rotation applied to captured frames.
    pub rotation_deg: u16,
    /// Mirror captured frames left-right.
    pub hflip: bool,
    /// Mirror captured frames top-bottom.
    pub vflip: bool,
    /// Crop `(x, y, w, h)` in normalised coordinates, applied after rotation.
    pub roi: Option<(f64, f64, f64, f64)>,
}

/// Capture-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Per-frame read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Frames read by `platecam check`.
    pub check_frames: u32,
    /// Where snapshots go.
    /// Defaults to `~/.local/share/platecam/snapshots`
    pub snapshot_dir: Option<PathBuf>,
    /// Image format for snapshots.
    pub snapshot_format: SnapshotFormat,
    /// Seconds between periodic snapshots in `platecam run`; 0 disables them.
    pub snapshot_every_secs: u64,
    /// Seconds between FPS reports in `platecam run`.
    pub report_interval_secs: u64,
    /// Frames buffered between the capture thread and its consumer.
    pub channel_capacity: usize,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let hardware = HardwareConfig::default();
        Self {
            driver: DriverKind::default(),
            device_index: hardware.device_index,
            default_resolution: hardware.default_resolution,
            default_framerate: hardware.default_framerate,
            rotation_deg: 0,
            hflip: false,
            vflip: false,
            roi: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 2_000,
            check_frames: 30,
            snapshot_dir: None, // Resolved at runtime
            snapshot_format: SnapshotFormat::default(),
            snapshot_every_secs: 0,
            report_interval_secs: 5,
            channel_capacity: 4,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered provider chain used by [`Config::load_from`].
    #[must_use]
    pub fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.default_resolution.is_empty() {
            return Err(Error::validation(format!(
                "default_resolution {} has a zero dimension",
                camera.default_resolution
            )));
        }

        if !(camera.default_framerate.is_finite() && camera.default_framerate >= MIN_FRAMERATE) {
            return Err(Error::validation(format!(
                "default_framerate must be at least {MIN_FRAMERATE}, got {}",
                camera.default_framerate
            )));
        }

        if !matches!(camera.rotation_deg, 0 | 90 | 180 | 270) {
            return Err(Error::validation(format!(
                "rotation_deg must be 0, 90, 180 or 270, got {}",
                camera.rotation_deg
            )));
        }

        if let Some(roi) = camera.roi {
            let oriented = self.orientation().output_size(camera.default_resolution);
            transform::roi_pixels(roi, oriented).map_err(|e| Error::validation(e.to_string()))?;
        }

        for (name, value) in [
            ("read_timeout_ms", self.capture.read_timeout_ms),
            ("check_frames", u64::from(self.capture.check_frames)),
            ("report_interval_secs", self.capture.report_interval_secs),
            ("channel_capacity", self.capture.channel_capacity as u64),
        ] {
            if value == 0 {
                return Err(Error::validation(format!("{name} must be greater than 0")));
            }
        }

        Ok(())
    }

    /// Hardware parameters for the camera factory.
    #[must_use]
    pub fn hardware(&self) -> HardwareConfig {
        HardwareConfig {
            device_index: self.camera.device_index,
            default_resolution: self.camera.default_resolution,
            default_framerate: self.camera.default_framerate,
        }
    }

    /// Orientation applied to frames after capture.
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        Orientation {
            rotation_deg: self.camera.rotation_deg,
            hflip: self.camera.hflip,
            vflip: self.camera.vflip,
        }
    }

    /// Get the snapshot directory, resolving defaults if not set.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.capture
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("snapshots"))
    }

    /// Get the read timeout as a Duration.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.read_timeout_ms)
    }

    /// Get the FPS report interval as a Duration.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.capture.report_interval_secs)
    }

    /// Get the periodic snapshot interval, if enabled.
    #[must_use]
    pub fn snapshot_every(&self) -> Option<Duration> {
        match self.capture.snapshot_every_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.camera.driver, DriverKind::V4l2);
        assert_eq!(config.camera.device_index, 0);
        assert_eq!(config.camera.default_resolution, Resolution::new(640, 480));
        assert!(config.camera.roi.is_none());
        assert_eq!(config.capture.check_frames, 30);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_rotation() {
        let mut config = Config::default();
        config.camera.rotation_deg = 45;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("rotation_deg"));
    }

    #[test]
    fn test_validate_bad_framerate() {
        let mut config = Config::default();
        config.camera.default_framerate = 0.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_framerate"));

        config.camera.default_framerate = 1e-20;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_framerate"));
    }

    #[test]
    fn test_validate_bad_roi() {
        let mut config = Config::default();
        config.camera.roi = Some((0.5, 0.5, 1.5, 0.2));

        assert!(config.validate().is_err());

        config.camera.default_resolution = Resolution::new(32, 24);
        config.camera.roi = Some((0.0, 0.0, 0.01, 0.01));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.capture.read_timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("read_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_channel_capacity() {
        let mut config = Config::default();
        config.capture.channel_capacity = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("channel_capacity"));
    }

    #[test]
    fn test_hardware_from_camera_section() {
        let mut config = Config::default();
        config.camera.device_index = 2;
        config.camera.default_resolution = Resolution::new(1920, 1080);

        let hw = config.hardware();
        assert_eq!(hw.device_index, 2);
        assert_eq!(hw.default_resolution, Resolution::new(1920, 1080));
    }

    #[test]
    fn test_orientation() {
        let mut config = Config::default();
        assert!(config.orientation().is_identity());

        config.camera.rotation_deg = 180;
        config.camera.hflip = true;
        let o = config.orientation();
        assert_eq!(o.rotation_deg, 180);
        assert!(o.hflip);
        assert!(!o.vflip);
    }

    #[test]
    fn test_snapshot_dir_default() {
        let config = Config::default();
        let path = config.snapshot_dir();

        assert!(path.to_string_lossy().contains("platecam"));
        assert!(path.ends_with("snapshots"));
    }

    #[test]
    fn test_snapshot_dir_custom() {
        let mut config = Config::default();
        config.capture.snapshot_dir = Some(PathBuf::from("/var/lib/platecam"));

        assert_eq!(config.snapshot_dir(), PathBuf::from("/var/lib/platecam"));
    }

    #[test]
    fn test_durations() {
        let mut config = Config::default();
        assert_eq!(config.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(5));
        assert!(config.snapshot_every().is_none());

        config.capture.snapshot_every_secs = 10;
        assert_eq!(config.snapshot_every(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("platecam"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn test_load_from_toml() {
        let file = write_config(
            r#"
            [camera]
            driver = "mock"
            device_index = 1
            rotation_deg = 90
            roi = [0.1, 0.2, 0.5, 0.5]
            default_resolution = { width = 1280, height = 720 }

            [capture]
            snapshot_format = "png"
            check_frames = 10
            "#,
        );

        let config = Config::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.camera.driver, DriverKind::Mock);
        assert_eq!(config.camera.device_index, 1);
        assert_eq!(config.camera.rotation_deg, 90);
        assert_eq!(config.camera.roi, Some((0.1, 0.2, 0.5, 0.5)));
        assert_eq!(config.camera.default_resolution, Resolution::new(1280, 720));
        assert_eq!(config.capture.snapshot_format, SnapshotFormat::Png);
        assert_eq!(config.capture.check_frames, 10);
        // Untouched keys keep their defaults.
        assert_eq!(config.capture.read_timeout_ms, 2_000);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config("[camera]\nrotation_deg = 45\n");
        let err = Config::load_from(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_rejects_unknown_driver() {
        let file = write_config("[camera]\ndriver = \"opencv\"\n");
        let err = Config::load_from(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("read_timeout_ms"));
        assert!(json.contains("\"driver\":\"v4l2\""));
    }

    #[test]
    fn test_capture_config_deserialize() {
        let json = r#"{"check_frames": 5, "snapshot_every_secs": 30}"#;
        let capture: CaptureConfig = serde_json::from_str(json).unwrap();
        assert_eq!(capture.check_frames, 5);
        assert_eq!(capture.snapshot_every_secs, 30);
        assert_eq!(capture.report_interval_secs, 5);
    }
}
