//! lazyplan-core: shared vocabulary of the engine.
//!
//! Schemas and row batches, column expressions with their scalar kernels,
//! logical plan nodes stored in an index-addressed arena, the data-source
//! contract, structural hashing, configuration and budget traits. No I/O and
//! no execution happen here.

#![forbid(unsafe_code)]

pub mod arena;
pub mod budget;
pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod kernels;
pub mod plan;
pub mod prelude;
pub mod schema;
pub mod source;
pub mod types;

pub use arena::{LogicalPlan, PlanArena, StructuralInterner};
pub use config::{EngineConfig, OptimizerConfig};
pub use error::{Error, Result};
pub use expr::{coalesce, col, count_rows, lit, null, AggFunc, BinaryOp, Expr, Function, UnaryOp};
pub use hash::Hash256;
pub use id::{NodeId, RequestId};
pub use plan::{JoinType, PlanNode, SortKey};
pub use schema::{DataType, Field, Schema};
pub use source::{BatchReader, DataSource, ScanRequest, SourceRef};
pub use types::{Column, RowBatch, Scalar};
