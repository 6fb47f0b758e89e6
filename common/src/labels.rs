//! Ordered class names of a classifier.
//!
use std::ops::Index;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("label set must contain at least one label")]
    Empty,
    #[error("label {0} is blank")]
    Blank(usize),
}

/// Ordered, non-empty sequence of class names.
///
/// Position `i` names the `i`-th score of the model output. The order must match the order the
/// model was trained with, nothing here can verify that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }
        if let Some(pos) = labels.iter().position(|label| label.trim().is_empty()) {
            return Err(LabelError::Blank(pos));
        }

        Ok(Self { labels })
    }

    /// Parse a comma-separated list, e.g. `"Big Lot,C Press,Snyders"`.
    pub fn parse_list(list: &str) -> Result<Self, LabelError> {
        Self::new(list.split(',').map(str::trim))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false, a label set is never empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Index<usize> for LabelSet {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.labels[index]
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = LabelError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}
