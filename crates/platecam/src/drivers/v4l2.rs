//! Video4Linux2 camera driver.
//!
//! Adapts [`platecam_linux::V4l2Device`] to the [`Camera`] trait. Frames are
//! negotiated as YUYV or MJPEG and converted to the configured pixel format
//! in software. Exposure, white balance, focus and flips are mapped onto V4L2
//! controls where the device has them. Rotation and ROI are never applied
//! here, so `current_config` reports them as unset.

use std::collections::HashMap;
use std::time::Duration;

use platecam_linux::{
    ControlId, ControlInfo, FrameSizeRange, PixelCode, RawFrame, V4l2Device, V4l2Error,
};
use tracing::{debug, info, warn};

use crate::camera::{
    Camera, CameraConfig, CameraError, Capabilities, Controls, ExposureCaps, FocusCaps, Frame,
    PixelFormat, Resolution, Result, WhiteBalanceCaps, DEFAULT_READ_TIMEOUT,
};
use crate::factory::HardwareConfig;
use crate::pixel;

/// Frames dropped by [`Camera::flush`].
const FLUSH_FRAMES: usize = 5;

/// Per-frame wait while flushing.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(50);

/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs steps.
const EXPOSURE_UNIT_US: u32 = 100;

/// Common sizes offered when a device reports a stepwise range.
const STEPWISE_CANDIDATES: [Resolution; 4] = [
    Resolution::new(640, 480),
    Resolution::new(1280, 720),
    Resolution::new(1920, 1080),
    Resolution::new(2592, 1944),
];

impl From<V4l2Error> for CameraError {
    fn from(err: V4l2Error) -> Self {
        match err {
            V4l2Error::Open { path, source } => CameraError::Open {
                device: path,
                message: source.to_string(),
            },
            V4l2Error::Timeout => CameraError::timeout("frame read"),
            V4l2Error::NotStreaming => CameraError::state("camera is not streaming"),
            V4l2Error::NoSupportedFormat { .. } => CameraError::Unsupported(err.to_string()),
            V4l2Error::Ioctl { .. } => CameraError::device(err.to_string()),
        }
    }
}

/// A camera backed by `/dev/videoN`.
#[derive(Debug)]
pub struct V4l2Camera {
    name: String,
    hardware: HardwareConfig,
    device: Option<V4l2Device>,
    controls: HashMap<ControlId, ControlInfo>,
    streaming: bool,
    config: CameraConfig,
    sequence: u64,
}

impl V4l2Camera {
    /// Create a driver for `/dev/video{hardware.device_index}`.
    ///
    /// The device is not touched until [`Camera::open`].
    #[must_use]
    pub fn new(hardware: HardwareConfig) -> Self {
        Self {
            name: format!("v4l2:{}", platecam_linux::device_path(hardware.device_index)),
            config: hardware.initial_camera_config(),
            hardware,
            device: None,
            controls: HashMap::new(),
            streaming: false,
            sequence: 0,
        }
    }

    fn device_mut(&mut self, operation: &str) -> Result<&mut V4l2Device> {
        self.device
            .as_mut()
            .ok_or_else(|| CameraError::state(format!("cannot {operation}: camera not open")))
    }

    fn has(&self, id: ControlId) -> bool {
        self.controls.contains_key(&id)
    }

    /// Push `config` to the device and work out what actually stuck.
    ///
    /// The stream flag is re-read from the device afterwards, since a format
    /// change stops the stream and a failed restart leaves it stopped.
    fn apply(&mut self, config: CameraConfig) -> Result<CameraConfig> {
        let result = self.apply_to_device(&config);
        self.streaming = self.device.as_ref().is_some_and(V4l2Device::is_streaming);
        if result.is_err() {
            if let Some(format) = self.device.as_ref().and_then(V4l2Device::format) {
                self.config.resolution = Resolution::new(format.width, format.height);
            }
        }
        result
    }

    fn apply_to_device(&mut self, config: &CameraConfig) -> Result<CameraConfig> {
        self.device_mut("configure")?;
        config.validate()?;
        let was_streaming = self.streaming;

        let device = self.device_mut("configure")?;
        let format = device.set_format(config.resolution.width, config.resolution.height)?;
        let framerate = match device.set_framerate(config.framerate) {
            Ok(fps) => fps,
            Err(e) => {
                warn!(error = %e, "Driver refused frame rate, keeping request");
                config.framerate
            }
        };

        let mut applied = CameraConfig {
            resolution: Resolution::new(format.width, format.height),
            framerate,
            pixel_format: config.pixel_format,
            rotation_deg: 0,
            roi_norm: None,
            ..config.clone()
        };

        applied.hflip = config.hflip && self.set_flag(ControlId::HorizontalFlip, true);
        if !config.hflip {
            self.set_flag(ControlId::HorizontalFlip, false);
        }
        applied.vflip = config.vflip && self.set_flag(ControlId::VerticalFlip, true);
        if !config.vflip {
            self.set_flag(ControlId::VerticalFlip, false);
        }

        self.apply_exposure(config, &mut applied);
        self.apply_white_balance(config, &mut applied);
        self.apply_focus(config, &mut applied);

        if was_streaming {
            // set_format tore the stream down; bring it back.
            self.device_mut("restart stream")?.start_stream()?;
        }

        if applied.resolution != config.resolution {
            info!(
                requested = %config.resolution,
                applied = %applied.resolution,
                "Camera adjusted resolution"
            );
        }
        debug!(format = ?format.code, fps = applied.framerate, "V4L2 configuration applied");
        Ok(applied)
    }

    /// Set a control, returning whether the device accepted it.
    fn set_value(&self, id: ControlId, value: i64) -> bool {
        let (Some(device), Some(info)) = (self.device.as_ref(), self.controls.get(&id)) else {
            return false;
        };
        match device.set_control(id, info.clamp(value)) {
            Ok(()) => true,
            Err(e) => {
                warn!(control = ?id, error = %e, "Control rejected");
                false
            }
        }
    }

    fn set_flag(&self, id: ControlId, enabled: bool) -> bool {
        let Some(device) = self.device.as_ref() else {
            return false;
        };
        if !self.has(id) {
            return false;
        }
        match device.set_flag(id, enabled) {
            Ok(()) => true,
            Err(e) => {
                warn!(control = ?id, error = %e, "Control rejected");
                false
            }
        }
    }

    fn apply_exposure(&self, config: &CameraConfig, applied: &mut CameraConfig) {
        if config.auto_exposure {
            // Many UVC cameras only offer aperture priority as their "auto".
            let ok = self.set_value(ControlId::ExposureAuto, ControlId::EXPOSURE_MODE_AUTO)
                || self.set_value(ControlId::ExposureAuto, 3);
            applied.auto_exposure = ok || !self.has(ControlId::ExposureAuto);
            applied.exposure_time_us = None;
        } else if let Some(us) = config.exposure_time_us {
            let manual = self.set_value(ControlId::ExposureAuto, ControlId::EXPOSURE_MODE_MANUAL);
            let units = i64::from(us / EXPOSURE_UNIT_US).max(1);
            if manual && self.set_value(ControlId::ExposureAbsolute, units) {
                let clamped = self.controls[&ControlId::ExposureAbsolute].clamp(units);
                applied.auto_exposure = false;
                applied.exposure_time_us = u32::try_from(clamped)
                    .ok()
                    .map(|u| u.saturating_mul(EXPOSURE_UNIT_US));
            } else {
                applied.auto_exposure = true;
                applied.exposure_time_us = None;
            }
        } else {
            applied.auto_exposure =
                !self.set_value(ControlId::ExposureAuto, ControlId::EXPOSURE_MODE_MANUAL);
            applied.exposure_time_us = None;
        }

        applied.iso = match config.iso {
            Some(iso) => self.apply_iso(iso),
            None => {
                self.set_value(ControlId::IsoSensitivityAuto, ControlId::ISO_MODE_AUTO);
                None
            }
        };
    }

    /// Select the ISO menu entry nearest `iso` and return the ISO it stands for.
    fn apply_iso(&self, iso: u32) -> Option<u32> {
        let (index, value) = iso_menu_choice(self.controls.get(&ControlId::IsoSensitivity), iso)?;
        let manual = self.set_value(ControlId::IsoSensitivityAuto, ControlId::ISO_MODE_MANUAL)
            || !self.has(ControlId::IsoSensitivityAuto);
        (manual && self.set_value(ControlId::IsoSensitivity, index)).then_some(value)
    }

    fn apply_white_balance(&self, config: &CameraConfig, applied: &mut CameraConfig) {
        if config.auto_white_balance {
            applied.auto_white_balance = self.set_flag(ControlId::AutoWhiteBalance, true)
                || !self.has(ControlId::AutoWhiteBalance);
            applied.white_balance_gain_r = None;
            applied.white_balance_gain_b = None;
            return;
        }

        let manual = self.set_flag(ControlId::AutoWhiteBalance, false);
        let scaled = |id: ControlId, gain: Option<f64>| -> Option<f64> {
            let gain = gain?;
            let info = self.controls.get(&id)?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let value = (info.default as f64 * gain).round() as i64;
            if self.set_value(id, value) && info.default != 0 {
                #[allow(clippy::cast_precision_loss)]
                let actual = info.clamp(value) as f64 / info.default as f64;
                Some(actual)
            } else {
                None
            }
        };
        if manual {
            applied.auto_white_balance = false;
            applied.white_balance_gain_r =
                scaled(ControlId::RedBalance, config.white_balance_gain_r);
            applied.white_balance_gain_b =
                scaled(ControlId::BlueBalance, config.white_balance_gain_b);
        } else {
            applied.auto_white_balance = true;
            applied.white_balance_gain_r = None;
            applied.white_balance_gain_b = None;
        }
    }

    fn apply_focus(&self, config: &CameraConfig, applied: &mut CameraConfig) {
        if config.auto_focus {
            applied.auto_focus =
                self.set_flag(ControlId::FocusAuto, true) || !self.has(ControlId::FocusAuto);
            applied.focus_distance_m = None;
            return;
        }

        self.set_flag(ControlId::FocusAuto, false);
        applied.auto_focus = false;
        applied.focus_distance_m = config.focus_distance_m.and_then(|distance| {
            let info = self.controls.get(&ControlId::FocusAbsolute)?;
            // Larger values focus closer; map 0..10 dioptres onto the range.
            let dioptres = (1.0 / distance).clamp(0.0, 10.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let value = info.minimum
                + ((info.maximum - info.minimum) as f64 * dioptres / 10.0).round() as i64;
            self.set_value(ControlId::FocusAbsolute, value).then_some(distance)
        });
    }

    fn to_frame(&mut self, raw: RawFrame) -> Result<Frame> {
        let (bgr, resolution) = match raw.format.code {
            PixelCode::Yuyv => {
                let res = Resolution::new(raw.format.width, raw.format.height);
                (pixel::yuyv_to_bgr(&raw.data, res)?, res)
            }
            PixelCode::Mjpeg => pixel::mjpeg_to_bgr(&raw.data)?,
        };
        let target = self.config.pixel_format;
        let data = pixel::from_bgr(bgr, resolution, target);

        self.sequence += 1;
        Ok(Frame::new(data, resolution.width, resolution.height, target)
            .with_sequence(self.sequence))
    }

    fn capture_raw(&mut self) -> Result<RawFrame> {
        let streaming = self.streaming;
        let device = self.device_mut("capture")?;
        if streaming {
            return Ok(device.next_frame(Some(DEFAULT_READ_TIMEOUT))?);
        }

        device.start_stream()?;
        let result = device.next_frame(Some(DEFAULT_READ_TIMEOUT));
        device.stop_stream();
        Ok(result?)
    }
}

/// Menu index and ISO value of the entry closest to `iso`.
fn iso_menu_choice(info: Option<&ControlInfo>, iso: u32) -> Option<(i64, u32)> {
    let (index, value) = info?.nearest_menu_value(i64::from(iso))?;
    Some((index, u32::try_from(value).ok()?))
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn current_config(&self) -> &CameraConfig {
        &self.config
    }

    fn open(&mut self, config: Option<CameraConfig>) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let device = V4l2Device::open(self.hardware.device_index)?;
        self.controls = match device.controls() {
            Ok(list) => list.into_iter().map(|info| (info.id, info)).collect(),
            Err(e) => {
                warn!(error = %e, "Could not enumerate controls");
                HashMap::new()
            }
        };
        info!(
            camera = %self.name,
            card = device.card(),
            controls = self.controls.len(),
            "Camera opened"
        );
        self.device = Some(device);

        let config = config.unwrap_or_else(|| self.hardware.initial_camera_config());
        match self.apply(config) {
            Ok(applied) => {
                self.config = applied;
                Ok(())
            }
            Err(e) => {
                self.device = None;
                self.controls.clear();
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.streaming = false;
        if self.device.take().is_some() {
            info!(camera = %self.name, "Camera closed");
        }
        self.controls.clear();
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        self.device_mut("start stream")?.start_stream()?;
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        if let Some(device) = self.device.as_mut() {
            device.stop_stream();
        }
        self.streaming = false;
        Ok(())
    }

    fn read(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        if !self.streaming {
            return Err(CameraError::state("camera is not streaming"));
        }
        let raw = self.device_mut("read")?.next_frame(timeout)?;
        self.to_frame(raw)
    }

    fn flush(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        if let Some(device) = self.device.as_mut() {
            device.discard(FLUSH_FRAMES, FLUSH_TIMEOUT)?;
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        let raw = self.capture_raw()?;
        self.to_frame(raw)
    }

    fn set_config(&mut self, config: CameraConfig) -> Result<CameraConfig> {
        let applied = self.apply(config)?;
        self.config = applied.clone();
        Ok(applied)
    }

    fn capabilities(&self) -> Result<Capabilities> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| CameraError::state("cannot query capabilities: camera not open"))?;

        let mut resolutions = Vec::new();
        for code in device.supported_codes()? {
            for size in device.frame_sizes(code)? {
                match size {
                    FrameSizeRange::Discrete { width, height } => {
                        resolutions.push(Resolution::new(width, height));
                    }
                    FrameSizeRange::Stepwise {
                        min_width,
                        max_width,
                        min_height,
                        max_height,
                    } => resolutions.extend(STEPWISE_CANDIDATES.iter().copied().filter(|r| {
                        (min_width..=max_width).contains(&r.width)
                            && (min_height..=max_height).contains(&r.height)
                    })),
                }
            }
        }
        resolutions.sort_by_key(|r| (r.width, r.height));
        resolutions.dedup();

        let exposure_range = self.controls.get(&ControlId::ExposureAbsolute).map(|info| {
            let to_us = |v: i64| {
                u32::try_from(v)
                    .ok()
                    .map(|u| u.saturating_mul(EXPOSURE_UNIT_US))
            };
            (to_us(info.minimum), to_us(info.maximum))
        });

        Ok(Capabilities {
            resolutions,
            pixel_formats: vec![
                PixelFormat::Bgr,
                PixelFormat::Rgb,
                PixelFormat::Gray8,
                PixelFormat::Yuv420,
            ],
            controls: Controls {
                exposure: ExposureCaps {
                    auto: self.has(ControlId::ExposureAuto),
                    manual: exposure_range.is_some(),
                    min_us: exposure_range.and_then(|(min, _)| min),
                    max_us: exposure_range.and_then(|(_, max)| max),
                },
                white_balance: WhiteBalanceCaps {
                    auto: self.has(ControlId::AutoWhiteBalance),
                    manual_gains: self.has(ControlId::RedBalance)
                        && self.has(ControlId::BlueBalance),
                },
                focus: FocusCaps {
                    auto: self.has(ControlId::FocusAuto),
                    manual_distance: self.has(ControlId::FocusAbsolute),
                },
            },
            roi_supported: false,
        })
    }
}
