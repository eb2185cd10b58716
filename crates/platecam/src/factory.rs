//! Central entry point for choosing and building the active camera driver.
//!
//! Upper layers ask the factory for a `Box<dyn Camera>` and never name a
//! driver type or device index themselves. Which driver is built, and with
//! what hardware parameters, comes from [`Config`].

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::camera::{Camera, CameraConfig, Resolution};
use crate::config::Config;
use crate::drivers::MockCamera;
use crate::error::{Error, Result};

/// The camera backends platecam can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Synthetic test-pattern camera, available everywhere.
    Mock,
    /// Video4Linux2 device (`/dev/videoN`), Linux only.
    #[default]
    V4l2,
}

impl DriverKind {
    /// Every driver kind, compiled in or not.
    pub const ALL: [Self; 2] = [Self::Mock, Self::V4l2];

    /// Whether this driver is compiled into the current build.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Mock => true,
            Self::V4l2 => cfg!(target_os = "linux"),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::V4l2 => write!(f, "v4l2"),
        }
    }
}

impl std::str::FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "v4l2" | "v4l" => Ok(Self::V4l2),
            _ => Err(Error::UnknownDriver {
                name: s.to_string(),
            }),
        }
    }
}

/// Hardware parameters handed to every driver constructor.
///
/// Drivers ignore fields that do not apply to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Device index, `/dev/video{device_index}` for V4L2.
    pub device_index: u32,
    /// Resolution requested when a camera is opened without a config.
    pub default_resolution: Resolution,
    /// Frame rate requested when a camera is opened without a config.
    pub default_framerate: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            default_resolution: Resolution::new(640, 480),
            default_framerate: 30.0,
        }
    }
}

impl HardwareConfig {
    /// The configuration a driver applies on `open(None)`.
    #[must_use]
    pub fn initial_camera_config(&self) -> CameraConfig {
        CameraConfig {
            resolution: self.default_resolution,
            framerate: self.default_framerate,
            ..CameraConfig::default()
        }
    }
}

/// Builds cameras according to configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraFactory;

impl CameraFactory {
    /// Create the camera selected by `config`.
    ///
    /// The camera is returned closed; call `open` or wrap it in a
    /// [`CameraSession`](crate::camera::CameraSession).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverUnavailable`] if the configured driver is not
    /// compiled into this build.
    pub fn create(config: &Config) -> Result<Box<dyn Camera>> {
        Self::create_driver(config.camera.driver, &config.hardware())
    }

    /// Create a specific driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverUnavailable`] if `kind` is not compiled in.
    pub fn create_driver(kind: DriverKind, hardware: &HardwareConfig) -> Result<Box<dyn Camera>> {
        info!(
            driver = %kind,
            device_index = hardware.device_index,
            resolution = %hardware.default_resolution,
            framerate = hardware.default_framerate,
            "Creating camera"
        );
        match kind {
            DriverKind::Mock => Ok(Box::new(MockCamera::new(hardware.clone()))),
            DriverKind::V4l2 => create_v4l2(hardware),
        }
    }

    /// Drivers compiled into this build.
    #[must_use]
    pub fn available() -> Vec<DriverKind> {
        DriverKind::ALL
            .into_iter()
            .filter(|kind| kind.is_available())
            .collect()
    }
}

#[cfg(target_os = "linux")]
fn create_v4l2(hardware: &HardwareConfig) -> Result<Box<dyn Camera>> {
    Ok(Box::new(crate::drivers::V4l2Camera::new(hardware.clone())))
}

#[cfg(not(target_os = "linux"))]
fn create_v4l2(_hardware: &HardwareConfig) -> Result<Box<dyn Camera>> {
    Err(Error::DriverUnavailable {
        driver: DriverKind::V4l2.to_string(),
        platform: std::env::consts::OS,
    })
}
