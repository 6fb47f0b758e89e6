//! Model output and its per-class view.
//!
use serde::{Deserialize, Serialize};

use crate::LabelSet;

/// Raw per-class scores as returned by the model.
///
/// Not guaranteed to be normalized. Most models used with this tool end in a plain dense layer,
/// so the values may be logits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub scores: Vec<f32>,
}

impl Prediction {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }

    /// Score of class `index`, zero if the model returned fewer values.
    pub fn score(&self, index: usize) -> f32 {
        self.scores.get(index).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Scores normalized with a softmax.
    pub fn softmax(&self) -> Prediction {
        Prediction::new(softmax(&self.scores))
    }
}

/// One rendered class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub index: usize,
    pub label: String,
    pub value: f32,
    pub is_best: bool,
}

impl ScoreLine {
    /// Value formatted as a percentage with one decimal, e.g. `81.0%`.
    pub fn percent(&self) -> String {
        format!("{:.1}%", self.value * 100.0)
    }
}

/// Index of the highest score among the first `len` classes.
///
/// Missing scores count as zero and ties resolve to the first occurrence. NaN never wins. Returns
/// `None` only for `len == 0`.
pub fn best_index(prediction: &Prediction, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }

    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for index in 0..len {
        let value = prediction.score(index);
        if value > best_value {
            best_value = value;
            best = index;
        }
    }

    Some(best)
}

/// Build one line per label, marking the best one.
pub fn score_lines(prediction: &Prediction, labels: &LabelSet) -> Vec<ScoreLine> {
    let best = best_index(prediction, labels.len());

    labels
        .iter()
        .enumerate()
        .map(|(index, label)| ScoreLine {
            index,
            label: label.to_owned(),
            value: prediction.score(index),
            is_best: Some(index) == best,
        })
        .collect()
}

/// Numerically stable softmax. An empty slice yields an empty vector.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return values.to_vec();
    }

    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn ties_resolve_to_first_occurrence() {
        let prediction = Prediction::new(vec![0.4, 0.4, 0.2]);
        assert_eq!(best_index(&prediction, 3), Some(0));

        let prediction = Prediction::new(vec![0.1, 0.7, 0.7]);
        assert_eq!(best_index(&prediction, 3), Some(1));
    }

    #[test]
    fn missing_scores_count_as_zero() {
        let prediction = Prediction::new(vec![-1.0]);

        assert_eq!(prediction.score(2), 0.0);
        // Index 1 is missing and therefore 0.0, which beats -1.0
        assert_eq!(best_index(&prediction, 3), Some(1));
        assert_eq!(best_index(&Prediction::default(), 2), Some(0));
        assert_eq!(best_index(&Prediction::default(), 0), None);
    }

    #[test]
    fn nan_never_wins() {
        let prediction = Prediction::new(vec![f32::NAN, 0.2, f32::NAN]);
        assert_eq!(best_index(&prediction, 3), Some(1));
    }

    #[test]
    fn score_lines_mark_exactly_one_best() -> Result<(), Error> {
        let labels = LabelSet::new(["a", "b", "c", "d"])?;
        let lines = score_lines(&Prediction::new(vec![0.3, 0.3]), &labels);

        assert_eq!(lines.len(), 4);
        assert_eq!(lines.iter().filter(|line| line.is_best).count(), 1);
        assert!(lines[0].is_best);
        assert_eq!(lines[3].value, 0.0);

        Ok(())
    }

    #[test]
    fn percent_has_one_decimal() {
        let line = ScoreLine {
            index: 1,
            label: "C Press".into(),
            value: 0.81,
            is_best: true,
        };
        assert_eq!(line.percent(), "81.0%");
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let probs = softmax(&[1.0, 3.0, 2.0]);
        let sum: f32 = probs.iter().sum();

        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[1] > probs[2] && probs[2] > probs[0]);
        assert!(softmax(&[]).is_empty());
    }
}
