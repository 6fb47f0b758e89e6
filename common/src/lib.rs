//! Data model shared by the `classifier` library, its binary and its tests.
pub mod labels;
pub mod prediction;

pub use labels::{LabelError, LabelSet};
pub use prediction::{best_index, score_lines, softmax, Prediction, ScoreLine};

/// Error type.
pub type Error = Box<dyn std::error::Error>;
