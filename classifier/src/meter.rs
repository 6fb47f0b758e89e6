use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;

use crate::tensor::TensorLedger;

/// Loop counters, reset by the logger on every report.
#[derive(Default)]
pub struct Meter {
    ticks: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            ticks: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_ticks(&self) -> u64 {
        self.ticks.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_executed(&self) -> u64 {
        self.executed.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_failed(&self) -> u64 {
        self.failed.swap(0, Ordering::Relaxed)
    }
}

/// Log rates of the loop every `period` until `stop` is cancelled.
pub fn spawn_meter_logger(
    meter: Arc<Meter>,
    ledger: TensorLedger,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = log_interval.tick() => {}
            }

            let ticks = meter.get_reset_ticks();
            let executed = meter.get_reset_executed();
            let failed = meter.get_reset_failed();
            let elapsed = start.elapsed().as_secs_f32();

            if ticks > 0 {
                log::info!(
                    "Refresh ticks per second: {:.2}, executed: {:.2}, failed: {:.2}",
                    ticks as f32 / elapsed,
                    executed as f32 / elapsed,
                    failed as f32 / elapsed
                );
                log::debug!("Tensors: {:?}", ledger);
            }
        }
    })
}
