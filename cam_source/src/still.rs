use std::path::Path;

use image::RgbImage;

use crate::{CameraError, FrameSource};

/// Serves one image as an endless sequence of identical frames.
pub struct StillImageSource {
    name: String,
    image: Option<RgbImage>,
    dimensions: (u32, u32),
}

impl StillImageSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let image = image::open(path)?.to_rgb8();
        log::info!(
            "Using still image {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );

        Ok(Self::from_image(path.display().to_string(), image))
    }

    pub fn from_image(name: impl Into<String>, image: RgbImage) -> Self {
        let dimensions = image.dimensions();
        Self {
            name: name.into(),
            image: Some(image),
            dimensions,
        }
    }
}

impl FrameSource for StillImageSource {
    fn describe(&self) -> String {
        format!("still image {}", self.name)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn capture(&mut self) -> Result<RgbImage, CameraError> {
        self.image.clone().ok_or(CameraError::Released)
    }

    fn release(&mut self) {
        self.image = None;
    }
}
