#![forbid(unsafe_code)]
//! lazyplan-operators: physical operators and expression evaluation.
//!
//! Design intent:
//! - Every operator has a batch form (`eval_batch`, whole inputs by reference)
//!   and a streaming form (`open_stream`, pull-based `BatchStream`s).
//! - Operator state that grows with input is reserved through `lazyplan-mem`
//!   guards; dropping the stream releases it.
//! - Each operator reports a coarse `Footprint` for the cost model and its
//!   `StreamingSupport` for the physical planner.

pub mod eval;
pub mod plan;
pub mod stream;
pub mod traits;

pub mod aggregate;
pub mod distinct;
pub mod filter;
pub mod join;
pub mod project;
pub mod scan;
pub mod slice;
pub mod sort;
pub mod union;

pub use plan::{Footprint, StreamingSupport};
pub use stream::{BatchQueue, BatchStream, MemoryStream, SharedCursor};
pub use traits::{materialize_stream, ExecContext, OpError, Operator};
