//! Error types for platecam.
//!
//! Camera drivers report [`CameraError`]; everything above them (config,
//! factory, snapshots, CLI) works in terms of [`Error`], which wraps it.

use std::path::PathBuf;
use thiserror::Error;

use crate::camera::CameraError;

/// The main error type for platecam operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Camera Errors ===
    /// A camera driver operation failed.
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    /// The requested driver name is not known.
    #[error("unknown camera driver '{name}' (expected mock or v4l2)")]
    UnknownDriver {
        /// The name that was asked for.
        name: String,
    },

    /// The requested driver is not compiled into this build.
    #[error("camera driver '{driver}' is not available on {platform}")]
    DriverUnavailable {
        /// Driver that was asked for.
        driver: String,
        /// Platform the binary was built for.
        platform: &'static str,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Encoding Errors ===
    /// Image encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for platecam operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error is a camera read timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Camera(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_wraps() {
        let err: Error = CameraError::timeout("frame read").into();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("frame read"));

        let err: Error = CameraError::state("not open").into();
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_unknown_driver_display() {
        let err = Error::UnknownDriver {
            name: "opencv".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("opencv"));
        assert!(msg.contains("v4l2"));
    }

    #[test]
    fn test_driver_unavailable_display() {
        let err = Error::DriverUnavailable {
            driver: "v4l2".to_string(),
            platform: "macos",
        };
        assert_eq!(
            err.to_string(),
            "camera driver 'v4l2' is not available on macos"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = Error::validation("read_timeout_ms must be greater than 0");
        assert!(err.to_string().contains("read_timeout_ms"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
