#![forbid(unsafe_code)]
//! lazyplan-exec: the engine, its two executors and the multi-plan coordinator.
//!
//! Design intent:
//! - Batch mode evaluates every node once, level by level on a rayon pool.
//! - Streaming mode builds a pull tree and only does work when the caller
//!   asks for the next batch.
//! - In both modes a node with several consumers is computed once and read
//!   through the `SharedResultStore`.
//! - Every byte held on behalf of a request is reserved from the engine's
//!   memory budget and released when the request ends, fails or is cancelled.

pub mod batch;
pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod shared;
pub mod streaming;

pub use cancel::CancellationToken;
pub use error::ExecError;
pub use metrics::{ExecStats, ExecutionReport};
pub use runtime::{Engine, ExecMode, ExecutionOutput};
pub use shared::{SharedResult, SharedResultStore};
pub use streaming::ResultStream;
