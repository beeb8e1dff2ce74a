//! facegate-hw — Webcam capture and frame handling.
//!
//! Provides V4L2-based camera access, pixel-format conversion to RGB and
//! overlay drawing for live previews.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameStream, PixelFormat};
pub use frame::Frame;
