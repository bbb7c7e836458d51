//! Convenient re-exports for downstream crates.

pub use crate::arena::{LogicalPlan, PlanArena, StructuralInterner};
pub use crate::config::{EngineConfig, OptimizerConfig};
pub use crate::error::{Error, Result};
pub use crate::expr::{coalesce, col, count_rows, lit, null, AggFunc, Expr};
pub use crate::id::NodeId;
pub use crate::plan::{JoinType, PlanNode, SortKey};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::source::{BatchReader, DataSource, ScanRequest, SourceRef};
pub use crate::types::{Column, RowBatch, Scalar};
