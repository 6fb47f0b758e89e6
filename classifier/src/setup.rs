//! Startup steps bounded by a timeout.
//!
use std::{path::PathBuf, time::Duration};

use cam_source::FrameSource;

use reqwest::Client;
use tokio::time::timeout;

use crate::{
    backend::{BackendSelector, Engine},
    error::{SetupError, SetupStage},
    nn::ModelLoader,
    tensor::TensorLedger,
    utils::{default_cache_dir, fetch_model},
};

/// Resolve the model to a local file, downloading it if needed.
pub async fn fetch_model_within(model: &str, limit: Duration) -> Result<PathBuf, SetupError> {
    let client = Client::new();
    let cache_dir = default_cache_dir();

    match timeout(limit, fetch_model(&client, model, &cache_dir)).await {
        Err(_) => Err(SetupError::Timeout(SetupStage::ModelFetch)),
        Ok(res) => res.map_err(|source| SetupError::ModelFetch {
            model: model.to_owned(),
            source,
        }),
    }
}

/// Compile and warm up the model on the first working backend.
///
/// Compilation is CPU bound and runs on the blocking pool. On timeout the compilation is
/// abandoned, its result is dropped when it eventually finishes.
pub async fn start_engine_within(
    selector: BackendSelector,
    loader: Box<dyn ModelLoader>,
    side: u32,
    ledger: &TensorLedger,
    limit: Duration,
) -> Result<Engine, SetupError> {
    let ledger = ledger.clone();
    let task = tokio::task::spawn_blocking(move || Engine::start(selector, loader, side, &ledger));

    match timeout(limit, task).await {
        Err(_) => Err(SetupError::Timeout(SetupStage::BackendSelection)),
        Ok(joined) => joined?,
    }
}

/// Open the frame source on the blocking pool.
///
/// V4L2 capture blocks until the device delivers a frame, and opening waits for the first one,
/// so a stalled camera would otherwise hang startup.
pub async fn open_source_within<F>(
    open: F,
    limit: Duration,
) -> Result<Box<dyn FrameSource>, SetupError>
where
    F: FnOnce() -> Result<Box<dyn FrameSource>, SetupError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(open);

    match timeout(limit, task).await {
        Err(_) => Err(SetupError::Timeout(SetupStage::Camera)),
        Ok(joined) => joined?,
    }
}

/// Everything a session needs besides its configuration.
pub struct Pipeline {
    pub engine: Engine,
    pub source: Box<dyn FrameSource>,
}

/// Run the startup sequence: fetch the model, start the engine, then open the frame source.
///
/// The source is only opened once a backend is active, so a failed backend selection never
/// touches the camera. Each step gets `limit` on its own.
pub async fn start_pipeline<L, F>(
    model: &str,
    make_loader: L,
    selector: BackendSelector,
    side: u32,
    ledger: &TensorLedger,
    open: F,
    limit: Duration,
) -> Result<Pipeline, SetupError>
where
    L: FnOnce(PathBuf) -> Box<dyn ModelLoader>,
    F: FnOnce() -> Result<Box<dyn FrameSource>, SetupError> + Send + 'static,
{
    let model_path = fetch_model_within(model, limit).await?;
    let engine = start_engine_within(selector, make_loader(model_path), side, ledger, limit).await?;
    let source = open_source_within(open, limit).await?;

    Ok(Pipeline { engine, source })
}

#[cfg(test)]
mod test {

    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use anyhow::{bail, Result};
    use cam_source::StillImageSource;
    use image::RgbImage;

    use super::*;
    use crate::{
        backend::BackendKind,
        nn::Classifier,
        preprocess::ModelInput,
    };

    struct Constant;

    impl Classifier for Constant {
        fn classify(&self, _input: &ModelInput) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    struct SlowLoader(Duration);

    struct BrokenLoader;

    impl ModelLoader for BrokenLoader {
        fn load(&self, backend: BackendKind) -> Result<Box<dyn Classifier>> {
            bail!("{} backend unavailable", backend)
        }
    }

    fn still_source() -> Result<Box<dyn FrameSource>, SetupError> {
        Ok(Box::new(StillImageSource::from_image("test", RgbImage::new(4, 4))))
    }

    /// Existing local file standing in for a model, the loaders never read it.
    fn model_file(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("classifier-setup-{name}.onnx"));
        std::fs::write(&path, b"onnx").unwrap();
        path.display().to_string()
    }

    impl ModelLoader for SlowLoader {
        fn load(&self, _backend: BackendKind) -> Result<Box<dyn Classifier>> {
            std::thread::sleep(self.0);
            Ok(Box::new(Constant))
        }
    }

    #[tokio::test]
    async fn engine_setup_times_out() {
        let res = start_engine_within(
            BackendSelector::default(),
            Box::new(SlowLoader(Duration::from_millis(500))),
            2,
            &TensorLedger::new(),
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(
            res,
            Err(SetupError::Timeout(SetupStage::BackendSelection))
        ));
    }

    #[tokio::test]
    async fn engine_setup_within_limit() {
        let engine = start_engine_within(
            BackendSelector::default(),
            Box::new(SlowLoader(Duration::ZERO)),
            2,
            &TensorLedger::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(engine.backend(), Some(BackendKind::Optimized));
    }

    #[tokio::test]
    async fn missing_local_model_is_a_fetch_error() {
        let res = fetch_model_within("no/such/model.onnx", Duration::from_secs(5)).await;
        assert!(matches!(res, Err(SetupError::ModelFetch { .. })));
    }

    #[tokio::test]
    async fn camera_start_times_out() {
        let res = open_source_within(
            || {
                std::thread::sleep(Duration::from_millis(500));
                still_source()
            },
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(res, Err(SetupError::Timeout(SetupStage::Camera))));
    }

    #[tokio::test]
    async fn camera_errors_are_passed_on() {
        let res = open_source_within(
            || Err(cam_source::CameraError::NoDevice("/dev/video0".to_owned()).into()),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(res, Err(SetupError::Camera(_))));
    }

    #[tokio::test]
    async fn camera_is_not_opened_without_backend() {
        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);

        let res = start_pipeline(
            &model_file("no-backend"),
            |_| Box::new(BrokenLoader) as Box<dyn ModelLoader>,
            BackendSelector::default(),
            2,
            &TensorLedger::new(),
            move || {
                flag.store(true, Ordering::SeqCst);
                still_source()
            },
            Duration::from_secs(5),
        )
        .await;

        match res {
            Err(SetupError::NoBackend(failures)) => assert_eq!(failures.len(), 2),
            Err(err) => panic!("unexpected error {err}"),
            Ok(_) => panic!("pipeline started without backend"),
        }
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pipeline_starts_engine_then_source() {
        let pipeline = start_pipeline(
            &model_file("started"),
            |_| Box::new(SlowLoader(Duration::ZERO)) as Box<dyn ModelLoader>,
            BackendSelector::default(),
            2,
            &TensorLedger::new(),
            still_source,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(pipeline.engine.backend(), Some(BackendKind::Optimized));
        assert_eq!(pipeline.source.dimensions(), (4, 4));
    }
}
