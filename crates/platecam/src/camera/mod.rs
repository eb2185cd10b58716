//! Hardware-agnostic camera abstraction.
//!
//! This module defines the [`Camera`] trait that every driver implements, the
//! data types frames and settings travel in, and the errors drivers report.
//! Upper layers (CLI, streaming, snapshots) only ever see `dyn Camera`.
//!
//! Typical lifecycle:
//!
//! ```no_run
//! use std::time::Duration;
//! use platecam::camera::Camera;
//! use platecam::drivers::MockCamera;
//!
//! let mut cam = MockCamera::default();
//! cam.open(None)?;
//! cam.start_stream()?;
//! let frame = cam.read(Some(Duration::from_secs(2)))?;
//! println!("{}x{} {}", frame.width, frame.height, frame.pixel_format);
//! cam.stop_stream()?;
//! cam.close()?;
//! # Ok::<(), platecam::camera::CameraError>(())
//! ```

mod types;

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub use types::{
    validate_roi, Capabilities, CameraConfig, Controls, ExposureCaps, FocusCaps, Frame,
    PixelFormat, Resolution, WhiteBalanceCaps, MIN_FRAMERATE,
};

/// Default timeout for [`Camera::read`] callers that have no opinion.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors a camera driver can report.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The device could not be opened.
    #[error("failed to open camera {device}: {message}")]
    Open {
        /// Device description (index, path or driver name).
        device: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A method was called in a state that does not allow it.
    #[error("invalid camera state: {0}")]
    State(String),

    /// No frame arrived in time.
    #[error("camera timed out: {operation}")]
    Timeout {
        /// What was being waited on.
        operation: String,
    },

    /// A configuration value was rejected.
    #[error("invalid camera configuration: {0}")]
    InvalidConfig(String),

    /// The backend cannot do what was asked.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Low-level device failure.
    #[error("device error: {0}")]
    Device(String),
}

impl CameraError {
    /// Create a state error.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a device error.
    #[must_use]
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// A generic camera.
///
/// Implementations must keep `is_open`/`is_streaming` accurate, raise
/// [`CameraError::Timeout`] from `read` on timeout, and return the settings
/// they actually applied from `set_config`.
pub trait Camera: Send {
    /// Human-readable camera name, e.g. `v4l2:/dev/video0`.
    fn name(&self) -> &str;

    /// Whether the device is open.
    fn is_open(&self) -> bool;

    /// Whether continuous capture is active.
    fn is_streaming(&self) -> bool;

    /// The configuration currently applied.
    fn current_config(&self) -> &CameraConfig;

    /// Open the camera, applying `config` or the driver's hardware defaults.
    ///
    /// Does nothing if already open.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::Open`] if the device cannot be opened.
    fn open(&mut self, config: Option<CameraConfig>) -> Result<()>;

    /// Close the camera and release all resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to release cleanly.
    fn close(&mut self) -> Result<()>;

    /// Start continuous capture.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] if the camera is not open.
    fn start_stream(&mut self) -> Result<()>;

    /// Stop continuous capture.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to stop.
    fn stop_stream(&mut self) -> Result<()>;

    /// Read the next frame of the stream. `None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] if not streaming and
    /// [`CameraError::Timeout`] if no frame arrives in time.
    fn read(&mut self, timeout: Option<Duration>) -> Result<Frame>;

    /// Drop buffered frames, e.g. after a configuration change.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails while draining.
    fn flush(&mut self) -> Result<()>;

    /// Capture a single still, whether or not the stream is running.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] if the camera is not open and
    /// [`CameraError::Timeout`] if the device yields nothing.
    fn capture(&mut self) -> Result<Frame>;

    /// Apply a configuration on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] if the camera is not open and
    /// [`CameraError::InvalidConfig`] if `config` fails validation.
    fn set_config(&mut self, config: CameraConfig) -> Result<CameraConfig>;

    /// Describe what the backend supports.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] if the camera is not open.
    fn capabilities(&self) -> Result<Capabilities>;

    /// Change the capture resolution.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.resolution = Resolution::new(width, height);
        self.set_config(cfg)
    }

    /// Change the frame rate.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_framerate(&mut self, fps: f64) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.framerate = fps;
        self.set_config(cfg)
    }

    /// Switch auto exposure, optionally with a manual time and ISO.
    ///
    /// The exposure time is dropped when `auto` is set; ISO is kept either way.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_exposure(
        &mut self,
        auto: bool,
        exposure_time_us: Option<u32>,
        iso: Option<u32>,
    ) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.auto_exposure = auto;
        cfg.exposure_time_us = if auto { None } else { exposure_time_us };
        cfg.iso = iso;
        self.set_config(cfg)
    }

    /// Switch auto white balance, optionally with manual red/blue gains.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_white_balance(
        &mut self,
        auto: bool,
        gain_r: Option<f64>,
        gain_b: Option<f64>,
    ) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.auto_white_balance = auto;
        cfg.white_balance_gain_r = if auto { None } else { gain_r };
        cfg.white_balance_gain_b = if auto { None } else { gain_b };
        self.set_config(cfg)
    }

    /// Switch autofocus, optionally with a manual distance in metres.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_focus(&mut self, auto: bool, distance_m: Option<f64>) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.auto_focus = auto;
        cfg.focus_distance_m = if auto { None } else { distance_m };
        self.set_config(cfg)
    }

    /// Set a normalised region of interest.
    ///
    /// Drivers may round to hardware alignment.
    ///
    /// # Errors
    ///
    /// See [`Camera::set_config`].
    fn set_roi(&mut self, x: f64, y: f64, w: f64, h: f64) -> Result<CameraConfig> {
        let mut cfg = self.current_config().clone();
        cfg.roi_norm = Some((x, y, w, h));
        self.set_config(cfg)
    }

    /// Iterate over stream frames until the stream stops.
    fn frames(&mut self, timeout: Option<Duration>) -> Frames<'_, Self>
    where
        Self: Sized,
    {
        Frames::new(self, timeout)
    }
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn is_streaming(&self) -> bool {
        (**self).is_streaming()
    }

    fn current_config(&self) -> &CameraConfig {
        (**self).current_config()
    }

    fn open(&mut self, config: Option<CameraConfig>) -> Result<()> {
        (**self).open(config)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn start_stream(&mut self) -> Result<()> {
        (**self).start_stream()
    }

    fn stop_stream(&mut self) -> Result<()> {
        (**self).stop_stream()
    }

    fn read(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        (**self).read(timeout)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn capture(&mut self) -> Result<Frame> {
        (**self).capture()
    }

    fn set_config(&mut self, config: CameraConfig) -> Result<CameraConfig> {
        (**self).set_config(config)
    }

    fn capabilities(&self) -> Result<Capabilities> {
        (**self).capabilities()
    }
}

/// Iterator over stream frames, see [`Camera::frames`].
///
/// Yields `Err` on read failures and ends once the camera stops streaming.
#[derive(Debug)]
pub struct Frames<'a, C: ?Sized> {
    camera: &'a mut C,
    timeout: Option<Duration>,
}

impl<'a, C: Camera + ?Sized> Frames<'a, C> {
    /// Iterate over `camera`'s stream.
    pub fn new(camera: &'a mut C, timeout: Option<Duration>) -> Self {
        Self { camera, timeout }
    }
}

impl<C: Camera + ?Sized> Iterator for Frames<'_, C> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.camera.is_streaming() {
            return None;
        }
        Some(self.camera.read(self.timeout))
    }
}

/// Scope guard that keeps a camera open for its lifetime.
///
/// Opens the camera on creation if needed. On drop the stream is stopped and
/// the camera closed, even when unwinding.
#[derive(Debug)]
pub struct CameraSession<C: Camera> {
    camera: C,
}

impl<C: Camera> CameraSession<C> {
    /// Open `camera` (if closed) with its default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera fails to open.
    pub fn open(camera: C) -> Result<Self> {
        Self::open_with(camera, None)
    }

    /// Open `camera` (if closed) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera fails to open.
    pub fn open_with(mut camera: C, config: Option<CameraConfig>) -> Result<Self> {
        if !camera.is_open() {
            camera.open(config)?;
        }
        Ok(Self { camera })
    }

    /// Stop and close the camera, reporting any failure.
    ///
    /// Dropping the session does the same but can only log errors.
    ///
    /// # Errors
    ///
    /// Returns the first error from stopping or closing. The camera is
    /// closed regardless.
    pub fn close(mut self) -> Result<()> {
        shutdown(&mut self.camera)
    }
}

impl<C: Camera> Deref for CameraSession<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.camera
    }
}

impl<C: Camera> DerefMut for CameraSession<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.camera
    }
}

impl<C: Camera> Drop for CameraSession<C> {
    fn drop(&mut self) {
        if let Err(e) = shutdown(&mut self.camera) {
            warn!(camera = self.camera.name(), error = %e, "Camera shutdown failed");
        }
    }
}

/// Stop streaming if active, then close if open.
fn shutdown<C: Camera + ?Sized>(camera: &mut C) -> Result<()> {
    let stopped = if camera.is_streaming() {
        camera.stop_stream()
    } else {
        Ok(())
    };
    let closed = if camera.is_open() {
        camera.close()
    } else {
        Ok(())
    };
    stopped.and(closed)
}
