//! Accounting of live tensors.
//!
//! Every buffer the pipeline allocates per frame is wrapped in a [`Tracked`] handle. Dropping the
//! handle releases the buffer and decrements the ledger, so the live count returns to its baseline
//! at the end of every iteration, also when an iteration bails out with an error.
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocated: AtomicU64,
}

/// Shared counter of live tensor handles.
#[derive(Clone, Default)]
pub struct TensorLedger {
    counters: Arc<Counters>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` and return a handle that unregisters it on drop.
    pub fn track<T>(&self, value: T) -> Tracked<T> {
        let live = self.counters.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.peak.fetch_max(live, Ordering::Relaxed);
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);

        Tracked {
            value,
            ledger: self.clone(),
        }
    }

    /// Number of handles currently alive.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Relaxed)
    }

    /// Highest number of handles alive at the same time.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Relaxed)
    }

    /// Number of handles ever created.
    pub fn allocated(&self) -> u64 {
        self.counters.allocated.load(Ordering::Relaxed)
    }

    fn release(&self) {
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for TensorLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorLedger")
            .field("live", &self.live())
            .field("peak", &self.peak())
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// Value registered in a [`TensorLedger`].
pub struct Tracked<T> {
    value: T,
    ledger: TensorLedger,
}

impl<T> Tracked<T> {
    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger.release();
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}
