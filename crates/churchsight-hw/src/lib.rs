//! churchsight-hw — Frame capture for the sighting tracker.
//!
//! Provides V4L2-based color camera access and an image-directory replay
//! source behind the [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
pub use source::{FrameSource, ImageDirSource};
