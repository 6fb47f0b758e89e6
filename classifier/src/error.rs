//! Error kinds of the pipeline.
//!
//! [`SetupError`]s are fatal for a session and are reported before the loop starts. [`FrameError`]s
//! only cost one iteration, the loop logs them and carries on with the next tick.
use std::fmt;

use cam_source::CameraError;
use common::LabelError;
use thiserror::Error;

use crate::backend::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    ModelFetch,
    BackendSelection,
    Camera,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::ModelFetch => write!(f, "model fetch"),
            SetupStage::BackendSelection => write!(f, "backend selection"),
            SetupStage::Camera => write!(f, "camera start"),
        }
    }
}

/// Why a backend could not be confirmed active.
#[derive(Debug)]
pub struct BackendFailure {
    pub kind: BackendKind,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid labels: {0}")]
    Labels(#[from] LabelError),
    #[error("failed to fetch model {model}: {source:#}")]
    ModelFetch {
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no backend could be initialized ({})", describe_failures(.0))]
    NoBackend(Vec<BackendFailure>),
    #[error("camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error("{0} timed out")]
    Timeout(SetupStage),
    #[error("setup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {width}x{height} pixels cannot be preprocessed")]
    EmptyFrame { width: u32, height: u32 },
    #[error("capture failed: {0}")]
    Capture(#[from] CameraError),
    #[error("inference on {backend} backend failed: {source:#}")]
    Inference {
        backend: BackendKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("no active backend")]
    NoEngine,
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "none configured".to_owned();
    }

    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.kind, failure.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn no_backend_lists_every_attempt() {
        let err = SetupError::NoBackend(vec![
            BackendFailure {
                kind: BackendKind::Optimized,
                reason: "unsupported op".into(),
            },
            BackendFailure {
                kind: BackendKind::Reference,
                reason: "bad shape".into(),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "no backend could be initialized (optimized: unsupported op; reference: bad shape)"
        );
        assert_eq!(
            SetupError::NoBackend(vec![]).to_string(),
            "no backend could be initialized (none configured)"
        );
    }

    #[test]
    fn timeout_names_the_stage() {
        assert_eq!(
            SetupError::Timeout(SetupStage::ModelFetch).to_string(),
            "model fetch timed out"
        );
    }
}
