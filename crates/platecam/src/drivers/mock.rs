//! Synthetic camera for tests and hardware-less development.
//!
//! Produces a moving BGR test pattern at the configured resolution, paced to
//! the configured frame rate. Every control is accepted and orientation and
//! ROI are applied in "hardware", so the frames it delivers always reflect
//! `current_config`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::camera::{
    Camera, CameraConfig, CameraError, Capabilities, Controls, ExposureCaps, FocusCaps, Frame,
    PixelFormat, Resolution, Result, WhiteBalanceCaps,
};
use crate::factory::HardwareConfig;
use crate::pixel;
use crate::transform::{self, Orientation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Normal,
    Stalled,
    FailOpen,
}

#[derive(Debug, Default)]
struct SharedState {
    open: AtomicBool,
    streaming: AtomicBool,
    frames: AtomicU64,
}

/// Read-only view of a [`MockCamera`]'s state that outlives the camera.
#[derive(Debug, Clone)]
pub struct MockStateHandle {
    state: Arc<SharedState>,
}

impl MockStateHandle {
    /// Whether the camera is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Whether the camera is streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::SeqCst)
    }
}

/// A camera that draws its own frames.
#[derive(Debug)]
pub struct MockCamera {
    name: String,
    hardware: HardwareConfig,
    behaviour: Behaviour,
    state: Arc<SharedState>,
    config: CameraConfig,
    next_due: Option<Instant>,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(HardwareConfig::default())
    }
}

impl MockCamera {
    /// Create a mock camera using `hardware` for its defaults.
    #[must_use]
    pub fn new(hardware: HardwareConfig) -> Self {
        Self::with_behaviour(hardware, Behaviour::Normal)
    }

    /// A camera that opens and streams but never delivers a frame.
    ///
    /// Reads fail with a timeout once the timeout elapses; with no timeout
    /// they fail at once instead of hanging.
    #[must_use]
    pub fn stalled() -> Self {
        Self::with_behaviour(HardwareConfig::default(), Behaviour::Stalled)
    }

    /// A camera whose `open` always fails.
    #[must_use]
    pub fn failing_open() -> Self {
        Self::with_behaviour(HardwareConfig::default(), Behaviour::FailOpen)
    }

    fn with_behaviour(hardware: HardwareConfig, behaviour: Behaviour) -> Self {
        Self {
            name: format!("mock:{}", hardware.device_index),
            config: hardware.initial_camera_config(),
            hardware,
            behaviour,
            state: Arc::new(SharedState::default()),
            next_due: None,
        }
    }

    /// A handle for observing this camera's state from elsewhere.
    #[must_use]
    pub fn state_handle(&self) -> MockStateHandle {
        MockStateHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CameraError::state(format!(
                "cannot {operation}: camera not open"
            )))
        }
    }

    fn frame_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.config.framerate).map_err(|_| {
            CameraError::InvalidConfig(format!(
                "framerate {} has no representable frame interval",
                self.config.framerate
            ))
        })
    }

    /// Validate `config`, including that its ROI survives cropping.
    fn check_config(config: &CameraConfig) -> Result<()> {
        config.validate()?;
        if let Some(roi) = config.roi_norm {
            let oriented = orientation_of(config).output_size(config.resolution);
            transform::roi_pixels(roi, oriented)?;
        }
        Ok(())
    }

    /// Draw the next test pattern frame and apply the current config to it.
    fn render(&self) -> Result<Frame> {
        let sequence = self.state.frames.fetch_add(1, Ordering::SeqCst);
        let Resolution { width, height } = self.config.resolution;
        let bgr = draw_pattern(width, height, sequence);

        let mut frame = Frame::new(bgr, width, height, PixelFormat::Bgr).with_sequence(sequence);
        frame = transform::prepare(&frame, orientation_of(&self.config), self.config.roi_norm)?;

        if self.config.pixel_format != PixelFormat::Bgr {
            let resolution = frame.resolution();
            frame.data = pixel::from_bgr(frame.data, resolution, self.config.pixel_format);
            frame.pixel_format = self.config.pixel_format;
            frame.channels = self.config.pixel_format.channels();
        }
        trace!(sequence, "Rendered mock frame");
        Ok(frame)
    }
}

fn orientation_of(config: &CameraConfig) -> Orientation {
    Orientation {
        rotation_deg: config.rotation_deg,
        hflip: config.hflip,
        vflip: config.vflip,
    }
}

/// Moving gradient with a bright horizontal band, roughly plate-shaped.
fn draw_pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    #[allow(clippy::cast_possible_truncation)]
    let shift = (sequence % 256) as usize;
    let band = (h * 2 / 5)..(h * 3 / 5).max(h * 2 / 5 + 1);

    let mut data = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            #[allow(clippy::cast_possible_truncation)]
            let px = if band.contains(&y) && x > w / 4 && x < w * 3 / 4 {
                [255, 255, 255]
            } else {
                [
                    ((x + shift * 4) & 0xff) as u8,
                    ((y + shift * 2) & 0xff) as u8,
                    ((x ^ y) & 0xff) as u8,
                ]
            };
            data.extend_from_slice(&px);
        }
    }
    data
}

impl Camera for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::SeqCst)
    }

    fn current_config(&self) -> &CameraConfig {
        &self.config
    }

    fn open(&mut self, config: Option<CameraConfig>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        if self.behaviour == Behaviour::FailOpen {
            return Err(CameraError::Open {
                device: self.name.clone(),
                message: "simulated open failure".to_string(),
            });
        }

        let config = config.unwrap_or_else(|| self.hardware.initial_camera_config());
        Self::check_config(&config)?;
        self.config = config;
        self.state.open.store(true, Ordering::SeqCst);
        debug!(camera = %self.name, resolution = %self.config.resolution, "Mock camera opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.streaming.store(false, Ordering::SeqCst);
        if self.state.open.swap(false, Ordering::SeqCst) {
            debug!(camera = %self.name, "Mock camera closed");
        }
        self.next_due = None;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        self.require_open("start stream")?;
        self.state.streaming.store(true, Ordering::SeqCst);
        self.next_due = None;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.state.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        if !self.is_streaming() {
            return Err(CameraError::state("camera is not streaming"));
        }

        if self.behaviour == Behaviour::Stalled {
            if let Some(t) = timeout {
                thread::sleep(t);
            }
            return Err(CameraError::timeout("frame read"));
        }

        let interval = self.frame_interval()?;
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if let Some(t) = timeout {
                if t < wait {
                    thread::sleep(t);
                    return Err(CameraError::timeout("frame read"));
                }
            }
            thread::sleep(wait);
        }
        self.next_due = Some(due.max(now) + interval);
        self.render()
    }

    fn flush(&mut self) -> Result<()> {
        self.next_due = None;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        self.require_open("capture")?;
        if self.behaviour == Behaviour::Stalled {
            return Err(CameraError::timeout("still capture"));
        }
        self.render()
    }

    fn set_config(&mut self, config: CameraConfig) -> Result<CameraConfig> {
        self.require_open("configure")?;
        Self::check_config(&config)?;
        self.config = config;
        self.next_due = None;
        Ok(self.config.clone())
    }

    fn capabilities(&self) -> Result<Capabilities> {
        self.require_open("query capabilities")?;
        Ok(Capabilities {
            resolutions: vec![
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
            ],
            pixel_formats: vec![
                PixelFormat::Bgr,
                PixelFormat::Rgb,
                PixelFormat::Gray8,
                PixelFormat::Yuv420,
            ],
            controls: Controls {
                exposure: ExposureCaps {
                    auto: true,
                    manual: true,
                    min_us: Some(50),
                    max_us: Some(200_000),
                },
                white_balance: WhiteBalanceCaps {
                    auto: true,
                    manual_gains: true,
                },
                focus: FocusCaps {
                    auto: true,
                    manual_distance: true,
                },
            },
            roi_supported: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_camera() -> MockCamera {
        let mut cam = MockCamera::new(HardwareConfig {
            default_resolution: Resolution::new(32, 24),
            default_framerate: 1000.0,
            ..HardwareConfig::default()
        });
        cam.open(None).unwrap();
        cam
    }

    #[test]
    fn test_open_applies_hardware_defaults() {
        let cam = fast_camera();
        assert_eq!(cam.current_config().resolution, Resolution::new(32, 24));
        assert!(cam.is_open());
        assert!(!cam.is_streaming());
    }

    #[test]
    fn test_open_with_config_and_idempotent() {
        let mut cam = MockCamera::default();
        let cfg = CameraConfig {
            resolution: Resolution::new(16, 16),
            ..CameraConfig::default()
        };
        cam.open(Some(cfg.clone())).unwrap();
        assert_eq!(cam.current_config(), &cfg);

        // Second open is a no-op and keeps the first config.
        cam.open(None).unwrap();
        assert_eq!(cam.current_config(), &cfg);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut cam = MockCamera::default();
        let cfg = CameraConfig {
            framerate: -1.0,
            ..CameraConfig::default()
        };
        assert!(matches!(cam.open(Some(cfg)), Err(CameraError::InvalidConfig(_))));
        assert!(!cam.is_open());
    }

    #[test]
    fn test_failing_open() {
        let mut cam = MockCamera::failing_open();
        assert!(matches!(cam.open(None), Err(CameraError::Open { .. })));
        assert!(!cam.is_open());
    }

    #[test]
    fn test_read_frames_are_bgr_and_sequenced() {
        let mut cam = fast_camera();
        cam.start_stream().unwrap();
        let a = cam.read(Some(Duration::from_secs(1))).unwrap();
        let b = cam.read(Some(Duration::from_secs(1))).unwrap();
        assert_eq!((a.width, a.height), (32, 24));
        assert_eq!(a.pixel_format, PixelFormat::Bgr);
        assert_eq!(a.channels, 3);
        assert!(a.is_well_formed());
        assert_eq!(b.sequence, a.sequence + 1);
        assert!(b.timestamp >= a.timestamp);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_read_paces_to_framerate() {
        let mut cam = fast_camera();
        cam.set_framerate(50.0).unwrap();
        cam.start_stream().unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            cam.read(Some(Duration::from_secs(1))).unwrap();
        }
        // First frame is immediate, the other four wait ~20 ms each.
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn test_read_times_out_before_next_frame() {
        let mut cam = fast_camera();
        cam.set_framerate(1.0).unwrap();
        cam.start_stream().unwrap();
        cam.read(Some(Duration::from_millis(10))).unwrap();
        let err = cam.read(Some(Duration::from_millis(10))).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_stalled_times_out() {
        let mut cam = MockCamera::stalled();
        cam.open(None).unwrap();
        cam.start_stream().unwrap();
        let start = Instant::now();
        let err = cam.read(Some(Duration::from_millis(20))).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(cam.read(None).unwrap_err().is_timeout());
        assert!(cam.capture().unwrap_err().is_timeout());
    }

    #[test]
    fn test_capture_without_stream() {
        let mut cam = fast_camera();
        let frame = cam.capture().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(32, 24));
    }

    #[test]
    fn test_capture_requires_open() {
        let mut cam = MockCamera::default();
        assert!(matches!(cam.capture(), Err(CameraError::State(_))));
        assert!(matches!(cam.capabilities(), Err(CameraError::State(_))));
        assert!(matches!(
            cam.set_config(CameraConfig::default()),
            Err(CameraError::State(_))
        ));
    }

    #[test]
    fn test_frames_honour_format_orientation_and_roi() {
        let mut cam = fast_camera();
        let mut cfg = cam.current_config().clone();
        cfg.pixel_format = PixelFormat::Gray8;
        cfg.rotation_deg = 90;
        cfg.roi_norm = Some((0.0, 0.0, 0.5, 1.0));
        cam.set_config(cfg).unwrap();

        let frame = cam.capture().unwrap();
        // 32x24 rotated is 24x32, left half is 12x32.
        assert_eq!(frame.resolution(), Resolution::new(12, 32));
        assert_eq!(frame.pixel_format, PixelFormat::Gray8);
        assert_eq!(frame.channels, 1);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_roi_too_small_for_resolution_is_rejected() {
        let mut cam = fast_camera();
        let err = cam.set_roi(0.0, 0.0, 0.01, 0.01).unwrap_err();
        assert!(matches!(err, CameraError::InvalidConfig(_)));
        assert_eq!(cam.current_config().roi_norm, None);
        assert!(cam.capture().is_ok());

        let mut closed = MockCamera::default();
        let cfg = CameraConfig {
            resolution: Resolution::new(32, 24),
            roi_norm: Some((0.0, 0.0, 0.01, 0.01)),
            ..CameraConfig::default()
        };
        assert!(matches!(closed.open(Some(cfg)), Err(CameraError::InvalidConfig(_))));
        assert!(!closed.is_open());
    }

    #[test]
    fn test_roi_checked_against_rotated_size() {
        let mut cam = fast_camera();
        let mut cfg = cam.current_config().clone();
        // One column wide on 32 pixels, none on the rotated 24.
        cfg.roi_norm = Some((0.0, 0.0, 0.018, 1.0));
        assert!(cam.set_config(cfg.clone()).is_ok());
        cfg.rotation_deg = 90;
        assert!(cam.set_config(cfg).is_err());
    }

    #[test]
    fn test_tiny_framerate_is_rejected() {
        let mut cam = fast_camera();
        assert!(matches!(
            cam.set_framerate(1e-20),
            Err(CameraError::InvalidConfig(_))
        ));
        cam.start_stream().unwrap();
        assert!(cam.read(Some(Duration::from_millis(10))).is_ok());
    }

    #[test]
    fn test_close_clears_state() {
        let mut cam = fast_camera();
        let handle = cam.state_handle();
        cam.start_stream().unwrap();
        assert!(handle.is_streaming());
        cam.close().unwrap();
        assert!(!handle.is_open());
        assert!(!handle.is_streaming());
        cam.close().unwrap();
    }

    #[test]
    fn test_flush_is_safe_when_closed() {
        let mut cam = MockCamera::default();
        assert!(cam.flush().is_ok());
    }

    #[test]
    fn test_capabilities() {
        let cam = fast_camera();
        let caps = cam.capabilities().unwrap();
        assert!(caps.resolutions.contains(&Resolution::new(1280, 720)));
        assert!(caps.pixel_formats.contains(&PixelFormat::Bgr));
        assert!(caps.controls.exposure.manual);
        assert!(caps.roi_supported);
    }

    #[test]
    fn test_pattern_size() {
        assert_eq!(draw_pattern(10, 5, 0).len(), 150);
        assert_ne!(draw_pattern(10, 5, 0), draw_pattern(10, 5, 1));
    }
}
