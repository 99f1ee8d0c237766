//! edgeface-hw — Frame acquisition for the recognition loop.
//!
//! Provides V4L2 color capture with index fallback, and an image-directory
//! source for offline runs. Both hand out RGB [`Frame`]s.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{FrameSource, ImageSequence, SourceError};
