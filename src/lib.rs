#![forbid(unsafe_code)]
//! lazyplan: deferred-execution query engine.
//!
//! Build a [`LazyFrame`](lazyplan_planner::LazyFrame), hand one or more of
//! them to an [`Engine`](lazyplan_exec::Engine), and pick batch or streaming
//! execution. The member crates are re-exported for anything the prelude
//! leaves out.

pub use lazyplan_core as core;
pub use lazyplan_exec as exec;
pub use lazyplan_io as io;
pub use lazyplan_mem as mem;
pub use lazyplan_operators as operators;
pub use lazyplan_planner as planner;

pub mod prelude {
    pub use lazyplan_core::prelude::*;
    pub use lazyplan_exec::{
        CancellationToken, Engine, ExecError, ExecMode, ExecutionOutput, ExecutionReport,
        ResultStream,
    };
    pub use lazyplan_io::{CountingSource, CsvSource, MemorySource};
    pub use lazyplan_planner::{GroupBy, LazyFrame};
}
