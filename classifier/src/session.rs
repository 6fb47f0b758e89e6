//! Supervising loop: camera -> preprocessing -> inference -> rendering.
//!
use std::{sync::Arc, time::Duration};

use cam_source::FrameSource;
use common::{LabelSet, Prediction};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::Engine,
    clock::{Clock, Throttle},
    config::PipelineConfig,
    error::FrameError,
    meter::Meter,
    preprocess::Preprocessor,
    render::{DisplaySink, Renderer},
    tensor::TensorLedger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// What a single refresh tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Executed,
    /// Throttled, too early since the last executed iteration.
    Skipped,
    /// The iteration failed, the loop carries on.
    Failed,
    Stopped,
}

/// One running pipeline with everything it owns.
pub struct Session {
    source: Box<dyn FrameSource>,
    preprocessor: Preprocessor,
    engine: Engine,
    renderer: Renderer,
    sink: Box<dyn DisplaySink>,
    throttle: Throttle,
    clock: Arc<dyn Clock>,
    ledger: TensorLedger,
    meter: Arc<Meter>,
    refresh: Duration,
    stop: CancellationToken,
    torn_down: bool,
}

impl Session {
    /// Assemble a session from its already initialized parts. The session starts `Running`.
    pub fn new(
        config: &PipelineConfig,
        labels: LabelSet,
        source: Box<dyn FrameSource>,
        engine: Engine,
        sink: Box<dyn DisplaySink>,
        clock: Arc<dyn Clock>,
        ledger: TensorLedger,
    ) -> Self {
        if engine.num_classes() != labels.len() {
            log::warn!(
                "Model returns {} scores but {} labels are configured",
                engine.num_classes(),
                labels.len()
            );
        }

        let mut session = Self {
            source,
            preprocessor: Preprocessor::new(config),
            engine,
            renderer: Renderer::new(labels, config.score_mode),
            sink,
            throttle: Throttle::new(config.min_interval()),
            clock,
            ledger,
            meter: Arc::new(Meter::new()),
            refresh: config.refresh_interval(),
            stop: CancellationToken::new(),
            torn_down: false,
        };

        let status = format!(
            "Running on {} with {} backend",
            session.source.describe(),
            session
                .engine
                .backend()
                .map(|kind| kind.to_string())
                .unwrap_or_default()
        );
        session.renderer.status(&status, session.sink.as_mut());

        session
    }

    pub fn state(&self) -> LoopState {
        match self.stop.is_cancelled() {
            true => LoopState::Stopped,
            false => LoopState::Running,
        }
    }

    /// Token stopping the loop when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn meter(&self) -> Arc<Meter> {
        Arc::clone(&self.meter)
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Drive the loop from display refresh ticks until stopped.
    ///
    /// A tick that arrives while an iteration is still running is skipped, so at most one
    /// inference is ever in flight.
    pub async fn run(&mut self) {
        let stop = self.stop.clone();
        let mut refresh = interval(self.refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = refresh.tick() => {
                    if self.tick() == TickOutcome::Stopped {
                        break;
                    }
                }
            }
        }
        log::info!("Loop stopped");
    }

    /// Handle one display refresh tick.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state() == LoopState::Stopped {
            return TickOutcome::Stopped;
        }

        self.meter.tick();
        if !self.throttle.ready(self.clock.now()) {
            return TickOutcome::Skipped;
        }

        match self.iterate() {
            Ok(prediction) => {
                self.renderer.render(&prediction, self.sink.as_mut());
                self.meter.tick_executed();
                TickOutcome::Executed
            }
            Err(err) => {
                log::error!("{}", err);
                self.renderer.error(&err.to_string(), self.sink.as_mut());
                self.meter.tick_failed();

                if let FrameError::Inference { .. } = err {
                    if let Some(kind) = self.engine.fall_back(&self.ledger) {
                        let status = format!("Switched to {} backend", kind);
                        self.renderer.status(&status, self.sink.as_mut());
                    }
                }
                TickOutcome::Failed
            }
        }
    }

    /// Capture, preprocess and classify one frame. All tensors are released on return.
    fn iterate(&mut self) -> Result<Prediction, FrameError> {
        let frame = self.source.capture()?;
        let input = self.preprocessor.prepare(frame, &self.ledger)?;
        self.engine.predict(&input)
    }

    /// Stop the loop and release camera and model.
    ///
    /// Idempotent, and also run when the session is dropped.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.stop.cancel();
        self.source.release();
        self.engine.reset();
        self.renderer.status("Stopped", self.sink.as_mut());

        if self.ledger.live() > 0 {
            log::warn!("{} tensors still alive after teardown", self.ledger.live());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
