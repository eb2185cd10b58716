//! End-to-end camera smoke test.
//!
//! Opens a camera, streams a batch of frames, measures the frame rate,
//! grabs a still and shuts everything down again. The camera is closed even
//! when a step fails.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::camera::{Camera, CameraSession, PixelFormat, Resolution, DEFAULT_READ_TIMEOUT};
use crate::error::Result;
use crate::snapshot;
use crate::stream::FpsMeter;

/// Parameters for a smoke test run.
#[derive(Debug, Clone)]
pub struct SmokeTest {
    /// Frames to read from the stream.
    pub frames: u32,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Where to write the still, if anywhere.
    pub output: Option<PathBuf>,
}

impl Default for SmokeTest {
    fn default() -> Self {
        Self {
            frames: 30,
            timeout: DEFAULT_READ_TIMEOUT,
            output: None,
        }
    }
}

/// What a successful smoke test observed.
#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    /// Camera name.
    pub camera: String,
    /// Frames read from the stream.
    pub frames: u32,
    /// Measured stream rate.
    pub fps: f64,
    /// Resolution of the still.
    pub resolution: Resolution,
    /// Pixel format of the still.
    pub pixel_format: PixelFormat,
    /// Where the still was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
}

impl SmokeTest {
    /// Run the smoke test, consuming the camera.
    ///
    /// # Errors
    ///
    /// Returns the first failure: open, stream start, a frame read (including
    /// a timeout), the still capture or writing it out.
    pub fn run<C: Camera>(&self, camera: C) -> Result<SmokeReport> {
        let mut camera = CameraSession::open(camera)?;
        info!(camera = camera.name(), frames = self.frames, "Smoke test starting");

        camera.start_stream()?;
        let mut meter = FpsMeter::new();
        for _ in 0..self.frames {
            let frame = camera.read(Some(self.timeout))?;
            debug!(sequence = frame.sequence, "Frame received");
            meter.tick();
        }
        let fps = meter.fps();
        info!(frames = meter.frames(), fps = format!("{fps:.1}"), "Stream measured");

        let still = camera.capture()?;
        let saved_to = match &self.output {
            Some(path) => {
                snapshot::save(&still, path)?;
                info!(path = %path.display(), "Still saved");
                Some(path.clone())
            }
            None => None,
        };

        let report = SmokeReport {
            camera: camera.name().to_string(),
            frames: self.frames,
            fps,
            resolution: still.resolution(),
            pixel_format: still.pixel_format,
            saved_to,
        };
        camera.close()?;
        Ok(report)
    }
}
