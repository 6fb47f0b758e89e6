//! Live classifier binary.
//!
use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cam_source::{FrameSource, StillImageSource};
use clap::Parser;
use classifier::{
    backend::{BackendKind, BackendSelector},
    clock::SystemClock,
    config::{
        CropStrategy, PipelineConfig, ResizeFilter, ScoreMode, ValueTransform, DEFAULT_DEVICE,
        DEFAULT_LABELS, DEFAULT_MODEL, INPUT_SIZE, REFRESH_HZ, SETUP_TIMEOUT, SHUTDOWN_GRACE,
        TARGET_FPS,
    },
    meter::spawn_meter_logger,
    nn::{ModelLoader, TractLoader},
    render::{DisplaySink, JsonLinesSink, TerminalSink},
    session::Session,
    setup::{start_pipeline, Pipeline},
    tensor::TensorLedger,
    SetupError,
};
use common::LabelSet;
use env_logger::fmt::TimestampPrecision;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Path or http(s) URL of the ONNX model
    #[clap(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Comma-separated class names in training order
    #[clap(long, conflicts_with = "labels_file")]
    labels: Option<String>,

    /// JSON file with an array of class names in training order
    #[clap(long)]
    labels_file: Option<PathBuf>,

    /// Side length of the square model input
    #[clap(long, default_value_t = INPUT_SIZE)]
    input_size: u32,

    /// Maximum number of classified frames per second, 0 for no limit
    #[clap(long, default_value_t = TARGET_FPS)]
    fps: f64,

    /// Rate of the refresh ticks driving the loop
    #[clap(long, default_value_t = REFRESH_HZ)]
    refresh_hz: f64,

    #[clap(long, value_enum, default_value_t = CropStrategy::Stretch)]
    crop: CropStrategy,

    #[clap(long, value_enum, default_value_t = ResizeFilter::Nearest)]
    filter: ResizeFilter,

    /// Divide pixel values by 255, only if the model was trained on [0, 1] input
    #[clap(long)]
    scale_to_unit: bool,

    /// Feed BGR instead of RGB, only if the model was trained on BGR input
    #[clap(long)]
    bgr: bool,

    /// Show raw model output or apply a softmax first
    #[clap(long, value_enum, default_value_t = ScoreMode::Raw)]
    scores: ScoreMode,

    /// Camera devices in order of preference
    #[clap(long = "device")]
    devices: Vec<String>,

    /// Capture resolution, e.g. 1280x720. Defaults to the largest one supported
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Classify a still image instead of camera frames
    #[clap(long)]
    image: Option<PathBuf>,

    /// Backends to try, in order
    #[clap(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [BackendKind::Optimized, BackendKind::Reference]
    )]
    backends: Vec<BackendKind>,

    /// Seconds allowed for each setup step: model fetch, model compilation, camera start
    #[clap(long, default_value_t = SETUP_TIMEOUT.as_secs())]
    setup_timeout: u64,

    /// Print one JSON object per update instead of a status line
    #[clap(long)]
    json: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            input_size: self.input_size,
            target_fps: self.fps,
            refresh_hz: self.refresh_hz,
            crop: self.crop,
            filter: self.filter,
            transform: ValueTransform {
                scale_to_unit: self.scale_to_unit,
                swap_rb: self.bgr,
            },
            score_mode: self.scores,
        }
    }

    fn labels(&self) -> Result<LabelSet> {
        if let Some(path) = &self.labels_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let labels = serde_json::from_str(&content)
                .with_context(|| format!("invalid label file {}", path.display()))?;
            return Ok(labels);
        }

        let labels = match &self.labels {
            Some(list) => LabelSet::parse_list(list),
            None => LabelSet::new(DEFAULT_LABELS),
        };
        Ok(labels.map_err(SetupError::from)?)
    }

    /// Opens the still image or the first working camera, to be run on the blocking pool.
    fn source_opener(
        &self,
    ) -> impl FnOnce() -> Result<Box<dyn FrameSource>, SetupError> + Send + 'static {
        let image = self.image.clone();
        let devices = match self.devices.is_empty() {
            true => vec![DEFAULT_DEVICE.to_owned()],
            false => self.devices.clone(),
        };
        let resolution = self.resolution;

        move || match image {
            Some(path) => Ok(Box::new(StillImageSource::open(path)?) as Box<dyn FrameSource>),
            None => open_camera(&devices, resolution),
        }
    }
}

#[cfg(target_os = "linux")]
fn open_camera(
    devices: &[String],
    resolution: Option<(u32, u32)>,
) -> Result<Box<dyn FrameSource>, SetupError> {
    let settings = cam_source::CameraSettings {
        resolution,
        ..Default::default()
    };
    Ok(Box::new(cam_source::open_first(devices, &settings)?))
}

#[cfg(not(target_os = "linux"))]
fn open_camera(
    _devices: &[String],
    _resolution: Option<(u32, u32)>,
) -> Result<Box<dyn FrameSource>, SetupError> {
    Err(cam_source::CameraError::NoneConfigured.into())
}

fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let width = width.trim().parse().map_err(|_| format!("bad width {width}"))?;
    let height = height.trim().parse().map_err(|_| format!("bad height {height}"))?;

    Ok((width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let labels = args.labels()?;
    let config = args.pipeline_config();
    let limit = Duration::from_secs(args.setup_timeout);
    let ledger = TensorLedger::new();

    let input_size = config.input_size;
    let Pipeline { engine, source } = start_pipeline(
        &args.model,
        |path| Box::new(TractLoader::new(path, input_size)) as Box<dyn ModelLoader>,
        BackendSelector::new(args.backends.clone()),
        input_size,
        &ledger,
        args.source_opener(),
        limit,
    )
    .await?;

    let sink: Box<dyn DisplaySink> = match args.json {
        true => Box::new(JsonLinesSink::stdout()),
        false => Box::new(TerminalSink::stdout()),
    };

    let mut session = Session::new(
        &config,
        labels,
        source,
        engine,
        sink,
        Arc::new(SystemClock),
        ledger.clone(),
    );
    let stop = session.stop_token();
    let meter_logger = spawn_meter_logger(
        session.meter(),
        ledger,
        Duration::from_secs(2),
        stop.clone(),
    );

    // Captures block their worker, Ctrl-C is awaited here on the main thread
    let mut running = tokio::spawn(async move {
        session.run().await;
        session
    });
    let mut session = tokio::select! {
        joined = &mut running => joined?,
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                log::error!("Failed to listen for Ctrl-C: {}", err);
            }
            log::info!("Interrupted, shutting down");
            stop.cancel();

            match timeout(SHUTDOWN_GRACE, &mut running).await {
                Ok(joined) => joined?,
                Err(_) => {
                    log::error!(
                        "Frame capture did not return within {:?}, exiting without teardown",
                        SHUTDOWN_GRACE
                    );
                    std::process::exit(1);
                }
            }
        }
    };

    // Releases camera and model on every way out of the loop
    session.teardown();
    if !args.json {
        println!();
    }
    meter_logger.await.ok();

    Ok(())
}
