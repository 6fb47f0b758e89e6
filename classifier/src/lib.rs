//! Classify live camera frames with a pre-trained ONNX model and show the class scores.
//!
//! The pipeline is a single cooperative loop: a [`session::Session`] grabs a frame from a
//! [`cam_source::FrameSource`], turns it into a `(1, side, side, 3)` tensor with a
//! [`preprocess::Preprocessor`], runs it through the [`backend::Engine`] and hands the scores to a
//! [`render::Renderer`].

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod meter;
pub mod nn;
pub mod preprocess;
pub mod render;
pub mod session;
pub mod setup;
pub mod tensor;
pub mod utils;

pub use error::{FrameError, SetupError};
