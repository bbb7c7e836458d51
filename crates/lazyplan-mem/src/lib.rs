#![forbid(unsafe_code)]
//! lazyplan-mem: hard memory budgeting.
//!
//! Concrete implementation of the interfaces in `lazyplan_core::budget`.
//! Materialized results and blocking operator state are reserved through
//! this crate so the engine can enforce its memory ceiling with RAII guards.

pub mod error;
pub mod guard;
pub mod tracking;

pub use error::{Error, Result};
pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use tracking::PeakTracker;
