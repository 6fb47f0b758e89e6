//! Backend selection and the engine running predictions on the selected backend.
//!
use std::fmt;

use clap::ValueEnum;
use common::Prediction;

use crate::{
    error::{BackendFailure, FrameError, SetupError},
    nn::{Classifier, ModelLoader},
    preprocess::ModelInput,
    tensor::TensorLedger,
};

/// Numeric backend a model is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BackendKind {
    /// Fully optimized plan with fused kernels.
    Optimized,
    /// Decluttered plan without kernel-level optimizations. Slower, fewer moving parts.
    Reference,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Optimized => write!(f, "optimized"),
            BackendKind::Reference => write!(f, "reference"),
        }
    }
}

/// Ordered backend preference.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    order: Vec<BackendKind>,
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new(vec![BackendKind::Optimized, BackendKind::Reference])
    }
}

impl BackendSelector {
    pub fn new(order: Vec<BackendKind>) -> Self {
        let mut deduped: Vec<BackendKind> = Vec::with_capacity(order.len());
        for kind in order {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        Self { order: deduped }
    }

    /// Backend to fall back to when `current` fails.
    pub fn next_after(&self, current: BackendKind) -> Option<BackendKind> {
        let pos = self.order.iter().position(|kind| *kind == current)?;
        self.order.get(pos + 1).copied()
    }

    /// Try the backends in order and return the first one confirmed active.
    ///
    /// A backend counts as active once the model compiled on it and a warm-up prediction on an
    /// all-zero input succeeded.
    pub fn select(
        &self,
        loader: &dyn ModelLoader,
        side: u32,
        ledger: &TensorLedger,
    ) -> Result<(BackendKind, Box<dyn Classifier>, usize), SetupError> {
        let mut failures = Vec::new();
        for &kind in self.order.iter() {
            match activate(loader, kind, side, ledger) {
                Ok((classifier, num_classes)) => {
                    log::info!("Using {} backend", kind);
                    return Ok((kind, classifier, num_classes));
                }
                Err(err) => {
                    log::warn!("Backend {} unavailable: {:#}", kind, err);
                    failures.push(BackendFailure {
                        kind,
                        reason: format!("{err:#}"),
                    });
                }
            }
        }

        Err(SetupError::NoBackend(failures))
    }
}

/// Compile on `kind` and run the warm-up prediction. Returns the number of output scores.
fn activate(
    loader: &dyn ModelLoader,
    kind: BackendKind,
    side: u32,
    ledger: &TensorLedger,
) -> anyhow::Result<(Box<dyn Classifier>, usize)> {
    let classifier = loader.load(kind)?;
    let warmup = ModelInput::zeros(side, ledger);
    let scores = classifier.classify(&warmup)?;

    Ok((classifier, scores.len()))
}

/// Selected backend with its compiled classifier.
pub struct Engine {
    selector: BackendSelector,
    loader: Box<dyn ModelLoader>,
    side: u32,
    active: Option<(BackendKind, Box<dyn Classifier>)>,
    num_classes: usize,
    fallback_attempted: bool,
}

impl Engine {
    /// Select a backend and warm up the model on it.
    pub fn start(
        selector: BackendSelector,
        loader: Box<dyn ModelLoader>,
        side: u32,
        ledger: &TensorLedger,
    ) -> Result<Self, SetupError> {
        let (kind, classifier, num_classes) = selector.select(loader.as_ref(), side, ledger)?;

        Ok(Self {
            selector,
            loader,
            side,
            active: Some((kind, classifier)),
            num_classes,
            fallback_attempted: false,
        })
    }

    pub fn backend(&self) -> Option<BackendKind> {
        self.active.as_ref().map(|(kind, _)| *kind)
    }

    /// Number of scores the model produced during warm-up.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn fallback_attempted(&self) -> bool {
        self.fallback_attempted
    }

    pub fn predict(&self, input: &ModelInput) -> Result<Prediction, FrameError> {
        let (backend, classifier) = self.active.as_ref().ok_or(FrameError::NoEngine)?;
        let scores = classifier
            .classify(input)
            .map_err(|source| FrameError::Inference {
                backend: *backend,
                source,
            })?;

        Ok(Prediction::new(scores))
    }

    /// Switch to the next backend after a failure of the current one.
    ///
    /// Only one attempt is made per engine. If it fails, the current backend stays active.
    /// Returns the backend switched to.
    pub fn fall_back(&mut self, ledger: &TensorLedger) -> Option<BackendKind> {
        if self.fallback_attempted {
            return None;
        }
        let next = self.selector.next_after(self.backend()?)?;
        self.fallback_attempted = true;

        log::warn!("Falling back to {} backend", next);
        match activate(self.loader.as_ref(), next, self.side, ledger) {
            Ok((classifier, num_classes)) => {
                self.active = Some((next, classifier));
                self.num_classes = num_classes;
                Some(next)
            }
            Err(err) => {
                log::error!("Fallback to {} backend failed: {:#}", next, err);
                None
            }
        }
    }

    /// Drop the compiled model and free its resources.
    pub fn reset(&mut self) {
        if let Some((kind, classifier)) = self.active.take() {
            drop(classifier);
            log::info!("Released model on {} backend", kind);
        }
    }
}

#[cfg(test)]
mod test {

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use anyhow::{bail, Result};

    use super::*;

    struct Fixed(Vec<f32>);

    impl Classifier for Fixed {
        fn classify(&self, _input: &ModelInput) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    /// Fails to compile for every backend listed in `broken`.
    struct Loader {
        broken: Vec<BackendKind>,
        loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for Loader {
        fn load(&self, backend: BackendKind) -> Result<Box<dyn Classifier>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.broken.contains(&backend) {
                bail!("{backend} not supported here");
            }
            Ok(Box::new(Fixed(vec![0.1, 0.9])))
        }
    }

    fn loader(broken: Vec<BackendKind>) -> (Box<Loader>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = Loader {
            broken,
            loads: Arc::clone(&loads),
        };
        (Box::new(loader), loads)
    }

    #[test]
    fn prefers_optimized_backend() {
        let (loader, loads) = loader(vec![]);
        let engine = Engine::start(BackendSelector::default(), loader, 4, &TensorLedger::new())
            .unwrap();

        assert_eq!(engine.backend(), Some(BackendKind::Optimized));
        assert_eq!(engine.num_classes(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_back_at_startup() {
        let (loader, loads) = loader(vec![BackendKind::Optimized]);
        let engine = Engine::start(BackendSelector::default(), loader, 4, &TensorLedger::new())
            .unwrap();

        assert_eq!(engine.backend(), Some(BackendKind::Reference));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fails_when_no_backend_works() {
        let (loader, _) = loader(vec![BackendKind::Optimized, BackendKind::Reference]);
        let res = Engine::start(BackendSelector::default(), loader, 4, &TensorLedger::new());

        match res {
            Err(SetupError::NoBackend(failures)) => {
                let kinds: Vec<_> = failures.iter().map(|f| f.kind).collect();
                assert_eq!(kinds, vec![BackendKind::Optimized, BackendKind::Reference]);
            }
            _ => panic!("expected NoBackend"),
        }
    }

    #[test]
    fn fallback_is_attempted_once() {
        let ledger = TensorLedger::new();
        let (loader, loads) = loader(vec![]);
        let mut engine = Engine::start(BackendSelector::default(), loader, 4, &ledger).unwrap();

        assert_eq!(engine.fall_back(&ledger), Some(BackendKind::Reference));
        assert_eq!(engine.fall_back(&ledger), None);
        assert!(engine.fallback_attempted());
        assert_eq!(engine.backend(), Some(BackendKind::Reference));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn no_fallback_from_last_backend() {
        let ledger = TensorLedger::new();
        let (loader, _) = loader(vec![]);
        let selector = BackendSelector::new(vec![BackendKind::Reference]);
        let mut engine = Engine::start(selector, loader, 4, &ledger).unwrap();

        assert_eq!(engine.fall_back(&ledger), None);
        assert!(!engine.fallback_attempted());
    }

    #[test]
    fn reset_drops_the_model() {
        let ledger = TensorLedger::new();
        let (loader, _) = loader(vec![]);
        let mut engine = Engine::start(BackendSelector::default(), loader, 4, &ledger).unwrap();

        engine.reset();
        assert_eq!(engine.backend(), None);
        assert!(matches!(
            engine.predict(&ModelInput::zeros(4, &ledger)),
            Err(FrameError::NoEngine)
        ));
    }

    #[test]
    fn selector_dedups_and_finds_successor() {
        let selector = BackendSelector::new(vec![
            BackendKind::Optimized,
            BackendKind::Optimized,
            BackendKind::Reference,
        ]);
        assert_eq!(selector.order, vec![BackendKind::Optimized, BackendKind::Reference]);
        assert_eq!(
            selector.next_after(BackendKind::Optimized),
            Some(BackendKind::Reference)
        );
        assert_eq!(selector.next_after(BackendKind::Reference), None);
    }
}
