//! Pipeline configuration and its defaults.
//!
use std::time::Duration;

use clap::ValueEnum;

/// Class names in training order.
pub const DEFAULT_LABELS: [&str; 3] = ["Big Lot", "C Press", "Snyders"];

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

/// Upper bound of executed pipeline iterations per second.
pub const TARGET_FPS: f64 = 10.0;

/// Rate of the display refresh ticks driving the loop.
pub const REFRESH_HZ: f64 = 60.0;

/// Time allowed for each setup step: fetching and compiling the model, starting the camera.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the loop gets to finish its current iteration after a stop request.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_MODEL: &str = "model.onnx";

pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// How a frame is brought to the square model input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CropStrategy {
    /// Resize the whole frame, ignoring its aspect ratio.
    #[default]
    Stretch,
    /// Crop the largest centered square, then resize.
    CenterCrop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Bilinear,
}

impl ResizeFilter {
    pub fn filter_type(self) -> image::imageops::FilterType {
        match self {
            ResizeFilter::Nearest => image::imageops::FilterType::Nearest,
            ResizeFilter::Bilinear => image::imageops::FilterType::Triangle,
        }
    }
}

/// Value transforms applied after resizing.
///
/// Both must match what the model was trained with. A mismatch does not fail, it only degrades
/// the predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueTransform {
    /// Divide pixel values by 255.
    pub scale_to_unit: bool,
    /// Feed channels as BGR instead of RGB.
    pub swap_rb: bool,
}

/// How model output is turned into displayed values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ScoreMode {
    /// Show the output as is. Correct for models ending in a softmax layer.
    #[default]
    Raw,
    /// Apply a softmax before display. Use for models emitting logits.
    Softmax,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input_size: u32,
    pub target_fps: f64,
    pub refresh_hz: f64,
    pub crop: CropStrategy,
    pub filter: ResizeFilter,
    pub transform: ValueTransform,
    pub score_mode: ScoreMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_size: INPUT_SIZE,
            target_fps: TARGET_FPS,
            refresh_hz: REFRESH_HZ,
            crop: CropStrategy::default(),
            filter: ResizeFilter::default(),
            transform: ValueTransform::default(),
            score_mode: ScoreMode::default(),
        }
    }
}

impl PipelineConfig {
    /// Minimum time between two executed iterations. Zero disables throttling.
    pub fn min_interval(&self) -> Duration {
        interval_for_rate(self.target_fps)
    }

    pub fn refresh_interval(&self) -> Duration {
        match interval_for_rate(self.refresh_hz) {
            interval if interval.is_zero() => interval_for_rate(REFRESH_HZ),
            interval => interval,
        }
    }
}

/// Period of `rate` per second. Zero for rates that are not positive or whose period does not
/// fit a `Duration`.
fn interval_for_rate(rate: f64) -> Duration {
    if !(rate.is_finite() && rate > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::ZERO)
}
