//! Turn camera frames into model input tensors.
//!
use image::{imageops, RgbImage};
use ndarray::Array4;

use crate::{
    config::{CropStrategy, PipelineConfig, ResizeFilter, ValueTransform},
    error::FrameError,
    tensor::{TensorLedger, Tracked},
};

/// Batch-of-one NHWC tensor `(1, side, side, 3)`.
#[derive(Debug)]
pub struct ModelInput {
    tensor: Tracked<Array4<f32>>,
}

impl ModelInput {
    /// All-zero input, used to warm up a freshly compiled model.
    pub fn zeros(side: u32, ledger: &TensorLedger) -> Self {
        let side = side as usize;
        Self {
            tensor: ledger.track(Array4::zeros((1, side, side, 3))),
        }
    }

    pub fn array(&self) -> &Array4<f32> {
        &self.tensor
    }

    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Ledger the input is registered in, for tensors derived from it.
    pub fn ledger(&self) -> &TensorLedger {
        self.tensor.ledger()
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    side: u32,
    crop: CropStrategy,
    filter: ResizeFilter,
    transform: ValueTransform,
}

impl Preprocessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            side: config.input_size,
            crop: config.crop,
            filter: config.filter,
            transform: config.transform,
        }
    }

    /// Crop/resize `frame` and convert it to a float tensor.
    ///
    /// The frame and every intermediate buffer are dropped before this returns.
    pub fn prepare(&self, frame: RgbImage, ledger: &TensorLedger) -> Result<ModelInput, FrameError> {
        let frame = ledger.track(frame);
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }

        let filter = self.filter.filter_type();
        let resized = match self.crop {
            CropStrategy::Stretch => {
                ledger.track(imageops::resize(&*frame, self.side, self.side, filter))
            }
            CropStrategy::CenterCrop => {
                let (x, y, size) = center_square(width, height);
                let cropped = ledger.track(imageops::crop_imm(&*frame, x, y, size, size).to_image());
                ledger.track(imageops::resize(&*cropped, self.side, self.side, filter))
            }
        };
        drop(frame);

        let ValueTransform {
            scale_to_unit,
            swap_rb,
        } = self.transform;
        let side = self.side as usize;
        let tensor = Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            let channel = if swap_rb { 2 - c } else { c };
            let value = resized.get_pixel(x as u32, y as u32)[channel] as f32;
            if scale_to_unit {
                value / 255.0
            } else {
                value
            }
        });

        Ok(ModelInput {
            tensor: ledger.track(tensor),
        })
    }
}

/// Largest centered square as `(x, y, side)`.
fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let size = width.min(height);
    ((width - size) / 2, (height - size) / 2, size)
}
