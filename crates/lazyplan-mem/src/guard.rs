//! The engine's hard memory cap and the RAII guards it hands out.
//!
//! Callers acquire a guard before holding data. Dropping the guard returns the
//! bytes to the budget (panic-safe), so dropping operator state on error or
//! cancellation is enough to release everything it reserved.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazyplan_core::budget::{BudgetGuard, MemoryBudget};

use crate::error::{Error, Result};
use crate::tracking::PeakTracker;

struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
    peak: PeakTracker,
}

impl BudgetInner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            peak: PeakTracker::new(),
        }
    }

    /// Reserve `bytes` unless that would cross the cap.
    fn try_acquire(&self, bytes: usize) -> bool {
        let reserved = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|next| *next <= self.capacity)
            });
        match reserved {
            Ok(before) => {
                self.peak.record_used(before + bytes);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn exceeded(&self, tag: &'static str, requested: usize) -> Error {
        Error::BudgetExceeded {
            tag,
            requested,
            capacity: self.capacity,
            used: self.used.load(Ordering::Relaxed),
        }
    }
}

/// Byte budget shared by every operator and executor of an engine.
#[derive(Clone)]
pub struct MemoryBudgetImpl {
    inner: Arc<BudgetInner>,
}

impl fmt::Debug for MemoryBudgetImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBudgetImpl")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used_bytes())
            .field("peak", &self.peak_bytes())
            .finish()
    }
}

impl MemoryBudgetImpl {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner::new(capacity_bytes)),
        }
    }

    /// Current usage (advisory).
    pub fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    /// Highest usage observed since creation or the last `reset_peak`.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.peak()
    }

    pub fn reset_peak(&self) {
        self.inner.peak.reset(self.used_bytes());
    }

    /// `try_acquire` with the failure spelled out.
    pub fn reserve(&self, bytes: usize, tag: &'static str) -> Result<BudgetGuardImpl> {
        self.try_acquire(bytes, tag)
            .ok_or_else(|| self.inner.exceeded(tag, bytes))
    }
}

/// RAII guard that accounts for a number of bytes.
/// Dropping it returns bytes to the budget.
pub struct BudgetGuardImpl {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl fmt::Debug for BudgetGuardImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BudgetGuard({}: {} bytes)", self.tag, self.bytes)
    }
}

impl Drop for BudgetGuardImpl {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl BudgetGuard for BudgetGuardImpl {
    fn bytes(&self) -> usize {
        self.bytes
    }
    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl BudgetGuardImpl {
    /// Move this reservation to `new_bytes`. Shrinking always succeeds;
    /// growing fails when the difference does not fit.
    pub fn try_resize(&mut self, new_bytes: usize) -> bool {
        match new_bytes.cmp(&self.bytes) {
            std::cmp::Ordering::Equal => {}
            std::cmp::Ordering::Less => self.inner.release(self.bytes - new_bytes),
            std::cmp::Ordering::Greater => {
                if !self.inner.try_acquire(new_bytes - self.bytes) {
                    return false;
                }
            }
        }
        self.bytes = new_bytes;
        true
    }

    /// Grow by `extra` bytes or report the budget overrun.
    pub fn grow(&mut self, extra: usize) -> Result<()> {
        if self.try_resize(self.bytes.saturating_add(extra)) {
            Ok(())
        } else {
            Err(self.inner.exceeded(self.tag, extra))
        }
    }
}

impl MemoryBudget for MemoryBudgetImpl {
    type Guard = BudgetGuardImpl;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.try_acquire(bytes) {
            return None;
        }
        Some(BudgetGuardImpl {
            inner: Arc::clone(&self.inner),
            bytes,
            tag,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}
