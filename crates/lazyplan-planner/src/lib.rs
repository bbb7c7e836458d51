#![forbid(unsafe_code)]
//! lazyplan-planner: from `LazyFrame` builder calls to an optimized logical
//! plan and then to a physical operator graph.
//!
//! Design:
//! - `frame` records operations into a shared `PlanArena`; every call
//!   validates immediately and never touches data.
//! - `optimizer` runs the ordered `rules` passes and checks root schemas
//!   after each one.
//! - `physical` lowers each node to an operator from `lazyplan-operators`,
//!   tagging streaming eligibility; `cost` supplies row estimates and the
//!   streaming chunk size.

pub mod cost;
pub mod explain;
pub mod frame;
pub mod optimizer;
pub mod physical;
pub mod rules;

pub use cost::{choose_chunk_rows, estimate_rows, estimate_work, WorkEstimate};
pub use explain::{explain_logical, explain_physical};
pub use frame::{GroupBy, LazyFrame};
pub use optimizer::{optimize, try_optimize, OptimizeError, Optimizer, Rule};
pub use physical::{lower, PhysicalNode, PhysicalPlan};
