//! Abstract memory budget interfaces.
//!
//! The concrete implementation lives in `lazyplan-mem`. Only traits live here
//! so operators can depend on the API without the accounting internals.

/// A guard returned by a memory budget when bytes are acquired.
///
/// It must be RAII (releases on Drop) and `Send`.
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;
    /// Optional debug tag for metrics/tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A handle representing a memory-cap enforcer.
///
/// Operators and executors call `try_acquire` before holding data. `None`
/// means the reservation does not fit; callers surface a resource error.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Approximate currently used bytes (advisory; not a correctness API).
    fn used_bytes(&self) -> usize;
}
