//! `platecam` - camera acquisition for a licence-plate recognition appliance
//!
//! This library provides a hardware-agnostic [`Camera`] interface, the
//! drivers behind it, and the plumbing around them: configuration, a driver
//! factory, pixel conversion, orientation and ROI transforms, snapshot
//! encoding and a background frame stream.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod camera;
pub mod check;
pub mod cli;
pub mod config;
pub mod drivers;
pub mod error;
pub mod factory;
pub mod logging;
pub mod pixel;
pub mod snapshot;
pub mod stream;
pub mod transform;

pub use camera::{
    Camera, CameraConfig, CameraError, CameraSession, Capabilities, Frame, PixelFormat, Resolution,
};
pub use check::{SmokeReport, SmokeTest};
pub use config::Config;
pub use error::{Error, Result};
pub use factory::{CameraFactory, DriverKind, HardwareConfig};
pub use logging::init_logging;
pub use snapshot::SnapshotFormat;
pub use stream::{FpsMeter, FrameStream, StreamHandle};
