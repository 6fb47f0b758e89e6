//! Rendering of predictions to a display surface.
//!
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};

use common::{score_lines, LabelSet, Prediction, ScoreLine};

use crate::config::ScoreMode;

/// Semantic fields of the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Status,
    Best,
    Score(usize),
    Error,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Status => write!(f, "status"),
            Field::Best => write!(f, "best"),
            Field::Score(index) => write!(f, "score.{index}"),
            Field::Error => write!(f, "error"),
        }
    }
}

/// Write-only sink keyed by [`Field`].
pub trait DisplaySink: Send {
    fn write(&mut self, field: Field, text: &str);

    fn clear(&mut self, field: Field);

    /// End of one update.
    fn flush(&mut self) {}
}

/// Build the displayed lines for `prediction`.
///
/// Scores missing from the prediction show as zero, scores without a label are ignored.
pub fn rank(prediction: &Prediction, labels: &LabelSet, mode: ScoreMode) -> Vec<ScoreLine> {
    match mode {
        ScoreMode::Raw => score_lines(prediction, labels),
        ScoreMode::Softmax => {
            // Normalize over the labelled classes only, so the shown values sum up to one
            let labelled: Vec<f32> = (0..labels.len()).map(|i| prediction.score(i)).collect();
            score_lines(&Prediction::new(labelled).softmax(), labels)
        }
    }
}

pub struct Renderer {
    labels: LabelSet,
    mode: ScoreMode,
}

impl Renderer {
    pub fn new(labels: LabelSet, mode: ScoreMode) -> Self {
        Self { labels, mode }
    }

    /// Show all classes and highlight the best one. Returns the rendered lines.
    pub fn render(&self, prediction: &Prediction, sink: &mut dyn DisplaySink) -> Vec<ScoreLine> {
        let lines = rank(prediction, &self.labels, self.mode);

        for line in lines.iter() {
            let marker = if line.is_best { "*" } else { " " };
            sink.write(
                Field::Score(line.index),
                &format!("{marker} {}: {}", line.label, line.percent()),
            );
            if line.is_best {
                sink.write(Field::Best, &format!("{} ({})", line.label, line.percent()));
            }
        }
        sink.clear(Field::Error);
        sink.flush();

        lines
    }

    pub fn status(&self, text: &str, sink: &mut dyn DisplaySink) {
        sink.write(Field::Status, text);
        sink.flush();
    }

    pub fn error(&self, text: &str, sink: &mut dyn DisplaySink) {
        sink.write(Field::Error, &format!("Error: {text}"));
        sink.flush();
    }
}

/// Prints the surface as one refreshed terminal line.
pub struct TerminalSink<W: Write = io::Stdout> {
    out: W,
    fields: BTreeMap<Field, String>,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            fields: BTreeMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&self) -> String {
        self.fields
            .iter()
            .filter(|(field, _)| !matches!(field, Field::Best))
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl<W: Write + Send> DisplaySink for TerminalSink<W> {
    fn write(&mut self, field: Field, text: &str) {
        self.fields.insert(field, text.to_owned());
    }

    fn clear(&mut self, field: Field) {
        self.fields.remove(&field);
    }

    fn flush(&mut self) {
        let line = self.line();
        // `\x1b[2K` clears the rest of the previous, possibly longer line
        if let Err(err) = write!(self.out, "\r\x1b[2K{line}").and_then(|_| self.out.flush()) {
            log::warn!("Failed to write to terminal: {}", err);
        }
    }
}

/// Prints one JSON object per update.
pub struct JsonLinesSink<W: Write = io::Stdout> {
    out: W,
    fields: BTreeMap<String, String>,
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            fields: BTreeMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> DisplaySink for JsonLinesSink<W> {
    fn write(&mut self, field: Field, text: &str) {
        self.fields.insert(field.to_string(), text.to_owned());
    }

    fn clear(&mut self, field: Field) {
        self.fields.remove(&field.to_string());
    }

    fn flush(&mut self) {
        let res = serde_json::to_writer(&mut self.out, &self.fields)
            .map_err(io::Error::from)
            .and_then(|_| writeln!(self.out))
            .and_then(|_| self.out.flush());
        if let Err(err) = res {
            log::warn!("Failed to write JSON line: {}", err);
        }
    }
}

/// In-memory surface. Clones share the same fields.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    fields: Arc<Mutex<BTreeMap<Field, String>>>,
    flushes: Arc<Mutex<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<String> {
        self.lock_fields().get(&field).cloned()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_fields(&self) -> std::sync::MutexGuard<'_, BTreeMap<Field, String>> {
        self.fields.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DisplaySink for MemorySink {
    fn write(&mut self, field: Field, text: &str) {
        self.lock_fields().insert(field, text.to_owned());
    }

    fn clear(&mut self, field: Field) {
        self.lock_fields().remove(&field);
    }

    fn flush(&mut self) {
        *self.flushes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
    }
}
