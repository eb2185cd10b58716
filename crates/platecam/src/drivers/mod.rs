//! Concrete [`Camera`](crate::camera::Camera) implementations.

pub mod mock;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use mock::{MockCamera, MockStateHandle};
#[cfg(target_os = "linux")]
pub use v4l2::V4l2Camera;
