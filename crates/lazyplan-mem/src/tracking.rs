//! Peak usage tracking.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Record a new "used bytes" value; updates peak if higher.
    /// Returns true when a new peak was set.
    pub fn record_used(&self, used_bytes: usize) -> bool {
        let mut cur = self.peak_bytes.load(Ordering::Relaxed);
        while used_bytes > cur {
            match self.peak_bytes.compare_exchange(
                cur,
                used_bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    tracing::trace!(peak_bytes = used_bytes, "new memory peak");
                    return true;
                }
                Err(observed) => cur = observed,
            }
        }
        false
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    /// Start a fresh measurement window at the current usage.
    pub fn reset(&self, used_bytes: usize) {
        self.peak_bytes.store(used_bytes, Ordering::Relaxed);
    }
}
