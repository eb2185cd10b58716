//! Linux-specific implementation for platecam
//!
//! This crate wraps Video4Linux2 capture devices (`/dev/videoN`) behind a small,
//! synchronous API. It knows nothing about the camera abstraction in the main
//! crate; it deals only in raw buffers, FourCC codes and V4L2 control ids.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod controls;
pub mod device;

pub use controls::{ControlId, ControlInfo};
pub use device::{FrameSizeRange, NegotiatedFormat, PixelCode, RawFrame, V4l2Device, V4l2Error};

/// Initialize Linux-specific components
///
/// # Errors
///
/// Returns an error if initialization fails
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let devices = list_devices();
    tracing::debug!(?devices, "Initializing Linux platform components");
    Ok(())
}

/// Indices of the `/dev/videoN` nodes present, in ascending order.
#[must_use]
pub fn list_devices() -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut indices: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("video"))
                .and_then(|n| n.parse().ok())
        })
        .collect();
    indices.sort_unstable();
    indices
}

/// Get platform name
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}

/// Path of the video device node for the given index.
#[must_use]
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_platform_name() {
        assert_eq!(platform_name(), "Linux");
    }

    #[test]
    fn test_list_devices_sorted() {
        let devices = list_devices();
        assert!(devices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(12), "/dev/video12");
    }
}
