use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tract_onnx::prelude::*;

use crate::{backend::BackendKind, preprocess::ModelInput};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loaded image classifier.
pub trait Classifier: Send {
    /// Run the model on `input` and return the raw per-class scores.
    ///
    /// No tensor of the model outlives this call, the scores are copied to a plain vector.
    fn classify(&self, input: &ModelInput) -> Result<Vec<f32>>;
}

/// Builds a classifier on a given backend.
pub trait ModelLoader: Send + Sync {
    fn load(&self, backend: BackendKind) -> Result<Box<dyn Classifier>>;
}

/// Loads an ONNX classifier taking `(1, side, side, 3)` float input.
pub struct TractLoader {
    path: PathBuf,
    side: usize,
}

impl TractLoader {
    pub fn new(path: impl Into<PathBuf>, side: u32) -> Self {
        Self {
            path: path.into(),
            side: side as usize,
        }
    }
}

impl ModelLoader for TractLoader {
    fn load(&self, backend: BackendKind) -> Result<Box<dyn Classifier>> {
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, self.side, self.side, 3),
        );
        let model = tract_onnx::onnx()
            .model_for_path(&self.path)
            .with_context(|| format!("failed to read model {}", self.path.display()))?
            .with_input_fact(0, input_fact)?;

        let plan: NnModel = match backend {
            BackendKind::Optimized => model.into_optimized()?.into_runnable()?,
            BackendKind::Reference => model.into_typed()?.into_decluttered()?.into_runnable()?,
        };
        log::debug!(
            "Compiled {} for {} backend",
            self.path.display(),
            backend
        );

        Ok(Box::new(TractClassifier { plan }))
    }
}

struct TractClassifier {
    plan: NnModel,
}

impl Classifier for TractClassifier {
    fn classify(&self, input: &ModelInput) -> Result<Vec<f32>> {
        let tensor: Tensor = input.array().clone().into();
        let outputs = input.ledger().track(self.plan.run(tvec!(tensor.into()))?);

        // Multi-output models carry the class scores first
        let output = outputs.first().context("model returned no output")?;
        let scores = output.to_array_view::<f32>()?;

        match scores.shape() {
            [_] | [1, _] => Ok(scores.iter().copied().collect()),
            shape => bail!("expected output of shape [C] or [1, C], got {:?}", shape),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::tensor::TensorLedger;

    #[test]
    fn missing_model_file_fails_on_every_backend() {
        let loader = TractLoader::new("does/not/exist.onnx", 224);
        for backend in [BackendKind::Optimized, BackendKind::Reference] {
            let err = loader.load(backend).err().expect("load must fail");
            assert!(format!("{err:#}").contains("does/not/exist.onnx"));
        }
    }

    /// Needs a classifier exported to ONNX, set `CLASSIFIER_TEST_MODEL` to its path.
    #[test]
    #[ignore]
    fn run_model_on_both_backends() -> Result<()> {
        let path = std::env::var("CLASSIFIER_TEST_MODEL").unwrap_or_else(|_| "model.onnx".into());
        let loader = TractLoader::new(path, 224);
        let ledger = TensorLedger::new();

        for backend in [BackendKind::Optimized, BackendKind::Reference] {
            let model = loader.load(backend)?;
            let scores = model.classify(&ModelInput::zeros(224, &ledger))?;
            println!("{backend}: {scores:?}");
            assert!(!scores.is_empty());
        }
        assert_eq!(ledger.live(), 0);

        Ok(())
    }
}
