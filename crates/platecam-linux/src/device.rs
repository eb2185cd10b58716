//! Video4Linux2 capture device wrapper.
//!
//! Opens `/dev/videoN`, negotiates a pixel format the main crate can decode
//! (YUYV preferred, MJPEG as fallback), and exposes memory-mapped streaming
//! with a per-read timeout.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{FourCC, Fraction};

use crate::controls::{ControlId, ControlInfo};

/// Number of mmap buffers requested from the driver.
const STREAM_BUFFERS: u32 = 4;

/// Errors that can occur while talking to a V4L2 device.
#[derive(Debug, Error)]
pub enum V4l2Error {
    /// The device node could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Device node path.
        path: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The device offers no pixel format we can decode.
    #[error("device offers no supported pixel format (have: {available})")]
    NoSupportedFormat {
        /// Formats the device advertised.
        available: String,
    },

    /// No frame was dequeued before the timeout.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The device is not streaming.
    #[error("device is not streaming")]
    NotStreaming,

    /// Any other ioctl failure.
    #[error("{operation} failed: {source}")]
    Ioctl {
        /// What we were doing.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl V4l2Error {
    fn ioctl(operation: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Ioctl { operation, source }
    }

    /// Check if this error is a read timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Result type for V4L2 operations.
pub type Result<T> = std::result::Result<T, V4l2Error>;

/// Pixel layouts the main crate knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelCode {
    /// Packed YUV 4:2:2, `Y0 U Y1 V`.
    Yuyv,
    /// Motion JPEG, one JPEG image per buffer.
    Mjpeg,
}

impl PixelCode {
    /// The FourCC code for this layout.
    #[must_use]
    pub fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Mjpeg => FourCC::new(b"MJPG"),
        }
    }

    /// Map a FourCC code back to a known layout.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }

    /// Formats in order of preference.
    pub const PREFERENCE: [Self; 2] = [Self::Yuyv, Self::Mjpeg];
}

/// The format the driver actually agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of delivered buffers.
    pub code: PixelCode,
}

/// Frame sizes a device offers for one pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeRange {
    /// A single fixed size.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// Any size within the bounds (steps ignored).
    Stepwise {
        /// Smallest width.
        min_width: u32,
        /// Largest width.
        max_width: u32,
        /// Smallest height.
        min_height: u32,
        /// Largest height.
        max_height: u32,
    },
}

/// A buffer dequeued from the device, copied out of the mmap arena.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Payload bytes (`bytesused` of the buffer).
    pub data: Vec<u8>,
    /// Format of the payload.
    pub format: NegotiatedFormat,
    /// Driver sequence number.
    pub sequence: u32,
}

/// An open V4L2 capture device.
pub struct V4l2Device {
    index: u32,
    device: Device,
    card: String,
    format: Option<NegotiatedFormat>,
    stream: Option<MmapStream<'static>>,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("index", &self.index)
            .field("card", &self.card)
            .field("format", &self.format)
            .field("streaming", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl V4l2Device {
    /// Open `/dev/video{index}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device node cannot be opened.
    pub fn open(index: u32) -> Result<Self> {
        let path = crate::device_path(index);
        let device = Device::new(index as usize).map_err(|source| V4l2Error::Open {
            path: path.clone(),
            source,
        })?;

        let card = match device.query_caps() {
            Ok(caps) => caps.card,
            Err(e) => {
                warn!(error = %e, path = %path, "VIDIOC_QUERYCAP failed");
                path.clone()
            }
        };

        debug!(path = %path, card = %card, "Opened V4L2 device");
        Ok(Self {
            index,
            device,
            card,
            format: None,
            stream: None,
        })
    }

    /// Card name reported by the driver.
    #[must_use]
    pub fn card(&self) -> &str {
        &self.card
    }

    /// The last negotiated format, if any.
    #[must_use]
    pub fn format(&self) -> Option<NegotiatedFormat> {
        self.format
    }

    /// Whether an mmap stream is active.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Pixel layouts the device advertises that we can decode.
    ///
    /// # Errors
    ///
    /// Returns an error if format enumeration fails.
    pub fn supported_codes(&self) -> Result<Vec<PixelCode>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(V4l2Error::ioctl("VIDIOC_ENUM_FMT"))?;
        Ok(formats
            .iter()
            .filter_map(|desc| PixelCode::from_fourcc(desc.fourcc))
            .collect())
    }

    /// Request a frame size, picking the best decodable pixel layout.
    ///
    /// The driver may adjust the size; the returned format is what it
    /// actually applied. Any active stream is stopped first since V4L2 does
    /// not allow format changes while buffers are queued.
    ///
    /// # Errors
    ///
    /// Returns an error if no decodable format exists or the ioctl fails.
    pub fn set_format(&mut self, width: u32, height: u32) -> Result<NegotiatedFormat> {
        self.stop_stream();

        let available = self.supported_codes()?;
        let Some(code) = PixelCode::PREFERENCE
            .into_iter()
            .find(|code| available.contains(code))
        else {
            let all = self
                .device
                .enum_formats()
                .map_err(V4l2Error::ioctl("VIDIOC_ENUM_FMT"))?
                .iter()
                .map(|desc| desc.fourcc.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(V4l2Error::NoSupportedFormat { available: all });
        };

        let mut fmt = self
            .device
            .format()
            .map_err(V4l2Error::ioctl("VIDIOC_G_FMT"))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = code.fourcc();

        let applied = self
            .device
            .set_format(&fmt)
            .map_err(V4l2Error::ioctl("VIDIOC_S_FMT"))?;

        let code = PixelCode::from_fourcc(applied.fourcc).unwrap_or(code);
        let negotiated = NegotiatedFormat {
            width: applied.width,
            height: applied.height,
            code,
        };
        if applied.width != width || applied.height != height {
            debug!(
                requested = %format_args!("{width}x{height}"),
                applied = %format_args!("{}x{}", applied.width, applied.height),
                "Driver adjusted frame size"
            );
        }
        self.format = Some(negotiated);
        Ok(negotiated)
    }

    /// Request a frame rate. Returns the rate the driver applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the ioctl fails.
    pub fn set_framerate(&mut self, fps: f64) -> Result<f64> {
        let mut params = self
            .device
            .params()
            .map_err(V4l2Error::ioctl("VIDIOC_G_PARM"))?;

        // Frame interval as a fraction with millisecond-ish precision.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let denominator = (fps * 1000.0).round().clamp(1.0, f64::from(u32::MAX)) as u32;
        params.interval = Fraction::new(1000, denominator);

        let applied = self
            .device
            .set_params(&params)
            .map_err(V4l2Error::ioctl("VIDIOC_S_PARM"))?;

        let interval = applied.interval;
        if interval.numerator == 0 {
            return Ok(fps);
        }
        Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
    }

    /// Enumerate frame sizes for a pixel layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the ioctl fails.
    pub fn frame_sizes(&self, code: PixelCode) -> Result<Vec<FrameSizeRange>> {
        let sizes = self
            .device
            .enum_framesizes(code.fourcc())
            .map_err(V4l2Error::ioctl("VIDIOC_ENUM_FRAMESIZES"))?;
        Ok(sizes
            .into_iter()
            .map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => FrameSizeRange::Discrete {
                    width: d.width,
                    height: d.height,
                },
                FrameSizeEnum::Stepwise(s) => FrameSizeRange::Stepwise {
                    min_width: s.min_width,
                    max_width: s.max_width,
                    min_height: s.min_height,
                    max_height: s.max_height,
                },
            })
            .collect())
    }

    /// Controls the device exposes that platecam can drive.
    ///
    /// # Errors
    ///
    /// Returns an error if the ioctl fails.
    pub fn controls(&self) -> Result<Vec<ControlInfo>> {
        let descriptions = self
            .device
            .query_controls()
            .map_err(V4l2Error::ioctl("VIDIOC_QUERYCTRL"))?;
        Ok(descriptions
            .iter()
            .filter_map(ControlInfo::from_description)
            .collect())
    }

    /// Set an integer or menu control.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the value.
    pub fn set_control(&self, id: ControlId, value: i64) -> Result<()> {
        trace!(control = ?id, value, "Setting V4L2 control");
        self.device
            .set_control(Control {
                id: id.raw(),
                value: Value::Integer(value),
            })
            .map_err(V4l2Error::ioctl("VIDIOC_S_CTRL"))
    }

    /// Set a boolean control.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the value.
    pub fn set_flag(&self, id: ControlId, enabled: bool) -> Result<()> {
        trace!(control = ?id, enabled, "Setting V4L2 control");
        self.device
            .set_control(Control {
                id: id.raw(),
                value: Value::Boolean(enabled),
            })
            .map_err(V4l2Error::ioctl("VIDIOC_S_CTRL"))
    }

    /// Allocate mmap buffers and start streaming.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer allocation fails.
    pub fn start_stream(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(V4l2Error::ioctl("VIDIOC_REQBUFS"))?;
        debug!(buffers = STREAM_BUFFERS, "V4L2 stream started");
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop streaming and release buffers. Safe to call when idle.
    pub fn stop_stream(&mut self) {
        if self.stream.take().is_some() {
            debug!("V4L2 stream stopped");
        }
    }

    /// Dequeue the next frame.
    ///
    /// `None` blocks until a frame arrives.
    ///
    /// # Errors
    ///
    /// Returns [`V4l2Error::Timeout`] if nothing arrives in time,
    /// [`V4l2Error::NotStreaming`] if the stream is not started.
    pub fn next_frame(&mut self, timeout: Option<Duration>) -> Result<RawFrame> {
        let format = self.current_format()?;
        let stream = self.stream.as_mut().ok_or(V4l2Error::NotStreaming)?;

        match timeout {
            Some(t) => stream.set_timeout(t),
            None => stream.clear_timeout(),
        }

        let (buf, meta) = stream.next().map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                V4l2Error::Timeout
            } else {
                V4l2Error::Ioctl {
                    operation: "VIDIOC_DQBUF",
                    source: e,
                }
            }
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        Ok(RawFrame {
            data: buf[..used].to_vec(),
            format,
            sequence: meta.sequence,
        })
    }

    /// Dequeue and drop up to `count` frames.
    ///
    /// Stops early on the first timeout; a slow camera simply has less to
    /// discard.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than a timeout.
    pub fn discard(&mut self, count: usize, timeout: Duration) -> Result<usize> {
        let mut dropped = 0;
        for _ in 0..count {
            match self.next_frame(Some(timeout)) {
                Ok(_) => dropped += 1,
                Err(V4l2Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        trace!(dropped, "Discarded buffered frames");
        Ok(dropped)
    }

    fn current_format(&mut self) -> Result<NegotiatedFormat> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        let fmt = self
            .device
            .format()
            .map_err(V4l2Error::ioctl("VIDIOC_G_FMT"))?;
        let code = PixelCode::from_fourcc(fmt.fourcc).ok_or_else(|| {
            V4l2Error::NoSupportedFormat {
                available: fmt.fourcc.to_string(),
            }
        })?;
        let format = NegotiatedFormat {
            width: fmt.width,
            height: fmt.height,
            code,
        };
        self.format = Some(format);
        Ok(format)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
