//! Operator trait + common interfaces.
//!
//! The physical planner instantiates one operator per plan node. The batch
//! executor calls `eval_batch` with every input fully materialized; the
//! streaming executor calls `open_stream` once and pulls from the result.

use std::fmt;
use std::sync::Arc;

use lazyplan_core::id::NodeId;
use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::guard::{BudgetGuardImpl, MemoryBudgetImpl};

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::{drain, BatchStream, MemoryStream};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("memory budget exceeded for '{tag}': requested {requested} bytes, capacity {capacity}, used {used}")]
    ResourceExhausted {
        tag: &'static str,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("execution cancelled")]
    Cancelled,

    /// An error attributed to the plan node (and streaming batch) where it occurred.
    #[error("{operator} at {node}{}: {cause}", batch_suffix(.batch))]
    Located {
        node: NodeId,
        operator: &'static str,
        batch: Option<usize>,
        cause: Box<OpError>,
    },
}

fn batch_suffix(batch: &Option<usize>) -> String {
    batch.map(|b| format!(" (batch {b})")).unwrap_or_default()
}

impl OpError {
    /// Attach node context unless the error already carries some.
    pub fn at(self, node: NodeId, operator: &'static str, batch: Option<usize>) -> OpError {
        match self {
            located @ OpError::Located { .. } => located,
            cause => OpError::Located {
                node,
                operator,
                batch,
                cause: Box::new(cause),
            },
        }
    }

    /// The error with any location wrapper removed.
    pub fn root_cause(&self) -> &OpError {
        match self {
            OpError::Located { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<lazyplan_core::Error> for OpError {
    fn from(e: lazyplan_core::Error) -> Self {
        use lazyplan_core::Error as E;
        match e {
            E::Schema(m) | E::Arity(m) => OpError::Schema(m),
            E::Source(m) => OpError::Source(m),
            E::Compute(m) => OpError::Exec(m),
            E::Plan(m) | E::Config(m) => OpError::Plan(m),
            E::Hash(m) | E::Invariant(m) => OpError::Exec(m),
        }
    }
}

impl From<lazyplan_mem::Error> for OpError {
    fn from(e: lazyplan_mem::Error) -> Self {
        match e {
            lazyplan_mem::Error::BudgetExceeded {
                tag,
                requested,
                capacity,
                used,
            } => OpError::ResourceExhausted {
                tag,
                requested,
                capacity,
                used,
            },
        }
    }
}

/// Per-request execution settings shared by every operator instance.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub budget: MemoryBudgetImpl,
    /// Rows per chunk requested from sources and between streaming stages.
    pub chunk_rows: usize,
    /// Hash partitions for batch-mode grouping aggregation.
    pub aggregate_partitions: usize,
}

impl ExecContext {
    pub fn new(budget: MemoryBudgetImpl, chunk_rows: usize, aggregate_partitions: usize) -> Self {
        Self {
            budget,
            chunk_rows: chunk_rows.max(1),
            aggregate_partitions: aggregate_partitions.max(1),
        }
    }

    /// Reserve `bytes` for operator state, mapping a refusal to `ResourceExhausted`.
    pub fn reserve(&self, bytes: usize, tag: &'static str) -> Result<BudgetGuardImpl, OpError> {
        Ok(self.budget.reserve(bytes, tag)?)
    }
}

/// Trait that all operators must implement.
///
/// Invariants:
/// - `eval_batch` and the stream from `open_stream` produce the same rows for
///   the same input (row order may differ only where documented).
/// - State that grows with input is reserved through `ExecContext::reserve`.
pub trait Operator: Send + Sync + fmt::Debug + 'static {
    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    fn output_schema(&self) -> &Schema;

    /// Quick/rough memory footprint model for the cost model.
    fn memory_need(&self, rows: u64, bytes: u64) -> Footprint;

    fn streaming_support(&self) -> StreamingSupport;

    /// Evaluate over fully materialized inputs.
    fn eval_batch(&self, inputs: &[Arc<RowBatch>], ctx: &ExecContext) -> Result<RowBatch, OpError>;

    /// Build a pull stream over input streams. Defaults to
    /// [`materialize_stream`].
    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        materialize_stream(self, inputs, ctx)
    }
}

/// Drain every input, run `eval_batch`, and replay the result in chunks.
///
/// The drained inputs are reserved from the budget while held; the replayed
/// output stays reserved until the returned stream is dropped.
pub fn materialize_stream<O: Operator + ?Sized>(
    op: &O,
    inputs: Vec<Box<dyn BatchStream>>,
    ctx: &ExecContext,
) -> Result<Box<dyn BatchStream>, OpError> {
    let mut guard = ctx.reserve(0, "materialize")?;
    let mut materialized = Vec::with_capacity(inputs.len());
    for (i, mut input) in inputs.into_iter().enumerate() {
        let parts = drain(input.as_mut(), ctx.chunk_rows)?;
        let batch = if parts.is_empty() {
            RowBatch::default()
        } else {
            RowBatch::concat_rows(parts).map_err(OpError::Exec)?
        };
        guard.grow(batch.approx_bytes())?;
        tracing::trace!(operator = op.name(), input = i, rows = batch.num_rows(), "materialized input");
        materialized.push(Arc::new(batch));
    }
    let out = op.eval_batch(&materialized, ctx)?;
    drop(materialized);
    let out_guard = ctx.reserve(out.approx_bytes(), "materialize")?;
    drop(guard);
    Ok(Box::new(MemoryStream::new(out).with_guard(out_guard)))
}

pub(crate) fn single_input<'a>(
    inputs: &'a [Arc<RowBatch>],
    name: &str,
) -> Result<&'a RowBatch, OpError> {
    match inputs {
        [only] => Ok(only.as_ref()),
        _ => Err(OpError::Exec(format!(
            "{name} expects one input, got {}",
            inputs.len()
        ))),
    }
}

pub(crate) fn single_stream(
    inputs: Vec<Box<dyn BatchStream>>,
    name: &str,
) -> Result<Box<dyn BatchStream>, OpError> {
    let n = inputs.len();
    let mut it = inputs.into_iter();
    match (it.next(), it.next()) {
        (Some(only), None) => Ok(only),
        _ => Err(OpError::Exec(format!("{name} expects one input stream, got {n}"))),
    }
}
