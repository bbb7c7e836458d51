//! Multi-plan coordinator: several roots, one merged plan.
//!
//! Frames built independently are interned into one arena, so equal
//! subplans (the same scan, the same filter over it, ...) become one node
//! whose result every root reuses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lazyplan_core::arena::{LogicalPlan, PlanArena, StructuralInterner};
use lazyplan_core::config::OptimizerConfig;
use lazyplan_core::types::RowBatch;
use lazyplan_operators::stream::drain;
use lazyplan_operators::ExecContext;
use lazyplan_planner::frame::LazyFrame;
use lazyplan_planner::{lower, Optimizer, PhysicalPlan};

use crate::batch::BatchExecutor;
use crate::cancel::CancellationToken;
use crate::error::ExecError;
use crate::metrics::ExecStats;
use crate::runtime::ExecMode;
use crate::shared::SharedResultStore;
use crate::streaming::StreamingExecutor;

/// Merge the frames' plans; root `i` of the result belongs to `frames[i]`.
pub fn merge(frames: &[LazyFrame]) -> Result<LogicalPlan, ExecError> {
    if frames.is_empty() {
        return Err(ExecError::Invalid("no frames to execute".into()));
    }
    let mut arena = PlanArena::new();
    let mut interner = StructuralInterner::new();
    let roots = frames
        .iter()
        .map(|f| arena.import_dedup(f.arena(), f.root(), &mut interner))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LogicalPlan::new(arena, roots))
}

/// A merged plan, optimized and lowered.
#[derive(Debug)]
pub struct PreparedPlan {
    pub logical: LogicalPlan,
    pub physical: PhysicalPlan,
    pub optimize_time: Duration,
}

/// Merge, optimize and lower. With `strict` an optimizer failure is an
/// error; otherwise the merged plan runs unoptimized.
pub fn prepare(
    frames: &[LazyFrame],
    config: &OptimizerConfig,
    strict: bool,
) -> Result<PreparedPlan, ExecError> {
    let merged = merge(frames)?;
    let started = Instant::now();
    let optimizer = Optimizer::new(config);
    let logical = if strict {
        optimizer.try_optimize(&merged)?
    } else {
        optimizer.optimize(&merged)
    };
    let optimize_time = started.elapsed();
    let physical = lower(&logical)?;
    tracing::debug!(
        roots = frames.len(),
        merged_nodes = merged.arena.len(),
        nodes = physical.len(),
        shared = physical.shared_nodes().len(),
        state_bytes = physical.estimated_state_bytes(),
        fingerprint = %physical.fingerprint.short(),
        "prepared plan"
    );
    Ok(PreparedPlan {
        logical,
        physical,
        optimize_time,
    })
}

/// Run a prepared plan to completion; one batch per root.
pub fn run(
    plan: &PhysicalPlan,
    mode: ExecMode,
    ctx: &ExecContext,
    pool: &rayon::ThreadPool,
    cancel: &CancellationToken,
    stats: &Arc<ExecStats>,
) -> Result<Vec<RowBatch>, ExecError> {
    let store = SharedResultStore::new(ctx.budget.clone());
    match mode {
        ExecMode::Batch => BatchExecutor::new(plan, ctx, &store, cancel, stats).run(pool),
        ExecMode::Streaming => {
            let result = run_streaming(plan, ctx, &store, cancel, stats);
            if result.is_err() {
                store.clear();
            }
            result
        }
    }
}

fn run_streaming(
    plan: &PhysicalPlan,
    ctx: &ExecContext,
    store: &SharedResultStore,
    cancel: &CancellationToken,
    stats: &Arc<ExecStats>,
) -> Result<Vec<RowBatch>, ExecError> {
    let mut executor = StreamingExecutor::new(plan, ctx, store, cancel.clone(), Arc::clone(stats));
    let mut out = Vec::with_capacity(plan.roots.len());
    for root in &plan.roots {
        let node = plan.node(*root)?;
        let mut stream = executor.open(*root)?;
        let parts = drain(stream.as_mut(), ctx.chunk_rows)
            .map_err(|e| ExecError::from_op(e, *root, node.op.name()))?;
        let batch = if parts.is_empty() {
            RowBatch::empty(&node.schema)
        } else {
            RowBatch::concat_rows(parts).map_err(ExecError::Invalid)?
        };
        out.push(batch);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::source::SourceRef;
    use lazyplan_core::types::Scalar;
    use lazyplan_io::MemorySource;

    fn source() -> SourceRef {
        SourceRef::new(
            MemorySource::from_columns("t", vec![("id", (0..10).map(Scalar::I64).collect())])
                .unwrap(),
        )
    }

    #[test]
    fn separately_built_frames_share_their_prefix() {
        let src = source();
        let a = LazyFrame::scan_ref(src.clone())
            .unwrap()
            .filter(col("id").gt(lit(2i64)))
            .unwrap();
        let b = LazyFrame::scan_ref(src)
            .unwrap()
            .filter(col("id").gt(lit(2i64)))
            .unwrap()
            .head(3)
            .unwrap();
        let merged = merge(&[a, b]).unwrap();
        assert_eq!(merged.roots.len(), 2);
        // scan, filter, slice
        assert_eq!(merged.arena.len(), 3);
        assert_eq!(merged.consumer_counts().unwrap()[&merged.roots[0]], 2);
    }

    #[test]
    fn nothing_to_merge_is_rejected() {
        assert!(matches!(merge(&[]), Err(ExecError::Invalid(_))));
    }
}
