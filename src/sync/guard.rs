use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight gate for guarded sync runs.
///
/// The gate is either idle or syncing. [`SingleFlight::try_acquire`] moves it
/// from idle to syncing with one compare-and-swap, so at most one caller holds
/// a [`FlightGuard`] at a time.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate, or `None` if a run is already in flight
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of a guarded run; releases the gate on drop
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
