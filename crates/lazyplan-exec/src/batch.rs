//! Batch executor: every node is evaluated once over fully materialized
//! inputs, one dependency level at a time.
//!
//! Nodes of a level have no edges between them and run in parallel on the
//! engine's rayon pool. Outputs go through the [`SharedResultStore`], so a
//! node with several consumers is still computed once.

use std::time::Instant;

use lazyplan_core::id::NodeId;
use lazyplan_core::types::RowBatch;
use lazyplan_operators::ExecContext;
use lazyplan_planner::PhysicalPlan;
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::error::ExecError;
use crate::metrics::ExecStats;
use crate::shared::SharedResultStore;

pub struct BatchExecutor<'a> {
    plan: &'a PhysicalPlan,
    ctx: &'a ExecContext,
    store: &'a SharedResultStore,
    cancel: &'a CancellationToken,
    stats: &'a ExecStats,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        plan: &'a PhysicalPlan,
        ctx: &'a ExecContext,
        store: &'a SharedResultStore,
        cancel: &'a CancellationToken,
        stats: &'a ExecStats,
    ) -> Self {
        Self {
            plan,
            ctx,
            store,
            cancel,
            stats,
        }
    }

    /// Run the whole plan and return one batch per root, in root order.
    ///
    /// On any failure the store is cleared, so nothing computed so far
    /// stays reserved.
    pub fn run(&self, pool: &rayon::ThreadPool) -> Result<Vec<RowBatch>, ExecError> {
        let result = self.run_levels(pool);
        if result.is_err() {
            self.store.clear();
        }
        result
    }

    fn run_levels(&self, pool: &rayon::ThreadPool) -> Result<Vec<RowBatch>, ExecError> {
        for (depth, level) in self.plan.levels().into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            tracing::trace!(depth, nodes = level.len(), "running level");
            pool.install(|| level.par_iter().try_for_each(|id| self.run_node(*id)))?;
        }
        self.plan
            .roots
            .iter()
            .map(|root| Ok(self.store.take(*root)?.into_batch()))
            .collect()
    }

    fn run_node(&self, id: NodeId) -> Result<(), ExecError> {
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let node = self.plan.node(id)?;
        let operator = node.op.name();
        let held = node
            .inputs
            .iter()
            .map(|i| self.store.take(*i))
            .collect::<Result<Vec<_>, _>>()?;
        let inputs: Vec<_> = held.iter().map(|r| r.batch.clone()).collect();

        let started = Instant::now();
        let out = node
            .op
            .eval_batch(&inputs, self.ctx)
            .map_err(|e| ExecError::from_op(e, id, operator))?;
        drop(inputs);
        drop(held);

        // Operators with nothing to return may hand back a column-less batch.
        let out = if out.num_columns() == 0 && !node.schema.is_empty() {
            RowBatch::empty(&node.schema)
        } else {
            out
        };
        tracing::debug!(
            node = %id,
            operator,
            rows = out.num_rows(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "executed node"
        );
        self.stats.record_node(operator);
        self.store
            .publish(id, node.fingerprint, out, node.consumers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::plan::JoinType;
    use lazyplan_core::types::Scalar;
    use lazyplan_io::{CountingSource, MemorySource};
    use lazyplan_mem::MemoryBudgetImpl;
    use lazyplan_planner::frame::LazyFrame;
    use lazyplan_planner::lower;

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn source(rows: i64) -> CountingSource {
        CountingSource::new(
            MemorySource::from_columns(
                "t",
                vec![
                    ("id", (0..rows).map(Scalar::I64).collect()),
                    ("k", (0..rows).map(|i| Scalar::I64(i % 3)).collect()),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn shared_node_runs_once_and_store_drains() {
        let src = source(30);
        let stats_src = src.stats();
        let base = LazyFrame::scan(src)
            .unwrap()
            .filter(col("id").gt(lit(5i64)))
            .unwrap();
        let joined = base.join(&base, ["id"], ["id"], JoinType::Semi).unwrap();
        let plan = lower(&joined.logical_plan().unwrap()).unwrap();

        let budget = MemoryBudgetImpl::new(1 << 20);
        let ctx = ExecContext::new(budget.clone(), 8, 2);
        let store = SharedResultStore::new(budget.clone());
        let stats = ExecStats::new();
        let cancel = CancellationToken::new();
        let out = BatchExecutor::new(&plan, &ctx, &store, &cancel, &stats)
            .run(&pool())
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].num_rows(), 24);
        assert_eq!(stats_src.scans(), 1);
        assert_eq!(stats.scans_started(), 1);
        assert_eq!(stats.nodes_executed(), plan.len());
        assert!(store.is_empty());
        drop(out);
        assert_eq!(budget.used_bytes(), 0);
    }

    #[test]
    fn failures_name_the_node_and_clear_the_store() {
        let src = source(30).failing_after(10);
        let lf = LazyFrame::scan(src)
            .unwrap()
            .select([col("id")])
            .unwrap();
        let plan = lower(&lf.logical_plan().unwrap()).unwrap();
        let budget = MemoryBudgetImpl::new(1 << 20);
        let ctx = ExecContext::new(budget.clone(), 4, 2);
        let store = SharedResultStore::new(budget.clone());
        let stats = ExecStats::new();
        let cancel = CancellationToken::new();
        let err = BatchExecutor::new(&plan, &ctx, &store, &cancel, &stats)
            .run(&pool())
            .unwrap_err();
        match err {
            ExecError::Execution { operator, .. } => assert_eq!(operator, "scan"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.is_empty());
        assert_eq!(budget.used_bytes(), 0);
    }

    #[test]
    fn cancelled_before_start() {
        let lf = LazyFrame::scan(source(5)).unwrap();
        let plan = lower(&lf.logical_plan().unwrap()).unwrap();
        let budget = MemoryBudgetImpl::new(1 << 20);
        let ctx = ExecContext::new(budget.clone(), 4, 2);
        let store = SharedResultStore::new(budget);
        let stats = ExecStats::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = BatchExecutor::new(&plan, &ctx, &store, &cancel, &stats)
            .run(&pool())
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
        assert_eq!(stats.nodes_executed(), 0);
    }
}
