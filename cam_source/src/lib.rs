//! Frame sources for the classifier: V4L2 cameras and still images.
//!
use image::RgbImage;

pub mod error;
#[cfg(target_os = "linux")]
pub mod sensors;
pub mod still;

pub use error::CameraError;
#[cfg(target_os = "linux")]
pub use sensors::{open_first, CameraSettings, V4lCamera};
pub use still::StillImageSource;

/// A continuous sequence of frames with stable dimensions.
///
/// Implementations are ready once constructed: the frame dimensions are known and `capture` can
/// be called.
pub trait FrameSource: Send {
    /// Human readable name, used in logs and status lines.
    fn describe(&self) -> String;

    /// Width and height of the frames returned by `capture`.
    fn dimensions(&self) -> (u32, u32);

    /// Grab the current frame.
    fn capture(&mut self) -> Result<RgbImage, CameraError>;

    /// Release the underlying device. Capturing afterwards fails with `CameraError::Released`.
    fn release(&mut self);
}
