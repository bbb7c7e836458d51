//! Streaming executor: a tree of pull streams, driven from the root.
//!
//! Shared nodes are materialized into the [`SharedResultStore`] the first
//! time a consumer opens them; every consumer then reads through its own
//! cursor. Materializing operators drain their inputs and run their batch
//! form ("spill to batch").

use std::collections::HashSet;
use std::sync::Arc;

use lazyplan_core::id::NodeId;
use lazyplan_core::schema::Schema;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::BudgetGuardImpl;
use lazyplan_operators::stream::drain;
use lazyplan_operators::{BatchStream, ExecContext, OpError, SharedCursor, StreamingSupport};
use lazyplan_planner::{PhysicalNode, PhysicalPlan};

use crate::cancel::CancellationToken;
use crate::error::ExecError;
use crate::metrics::ExecStats;
use crate::shared::SharedResultStore;

/// Counts batches, checks cancellation on every pull and attributes errors
/// to the node that produced them.
struct Tracked {
    inner: Box<dyn BatchStream>,
    node: NodeId,
    operator: &'static str,
    batches: usize,
    finished: bool,
    cancel: CancellationToken,
    stats: Arc<ExecStats>,
}

impl BatchStream for Tracked {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        self.cancel.check()?;
        match self.inner.next_batch(max_rows) {
            Ok(Some(batch)) => {
                self.batches += 1;
                self.stats.record_batch();
                Ok(Some(batch))
            }
            Ok(None) => {
                if !self.finished {
                    self.finished = true;
                    tracing::debug!(
                        node = %self.node,
                        operator = self.operator,
                        batches = self.batches,
                        "node exhausted"
                    );
                }
                Ok(None)
            }
            Err(e) => Err(e.at(self.node, self.operator, Some(self.batches))),
        }
    }
}

/// A cursor over a shared result that keeps its reservation alive.
struct PinnedCursor {
    cursor: SharedCursor,
    _guard: Arc<BudgetGuardImpl>,
}

impl BatchStream for PinnedCursor {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        self.cursor.next_batch(max_rows)
    }
}

pub struct StreamingExecutor<'a> {
    plan: &'a PhysicalPlan,
    ctx: &'a ExecContext,
    store: &'a SharedResultStore,
    cancel: CancellationToken,
    stats: Arc<ExecStats>,
    materialized: HashSet<NodeId>,
}

impl<'a> StreamingExecutor<'a> {
    pub fn new(
        plan: &'a PhysicalPlan,
        ctx: &'a ExecContext,
        store: &'a SharedResultStore,
        cancel: CancellationToken,
        stats: Arc<ExecStats>,
    ) -> Self {
        Self {
            plan,
            ctx,
            store,
            cancel,
            stats,
            materialized: HashSet::new(),
        }
    }

    /// Stream for one consumer of `id`.
    pub fn open(&mut self, id: NodeId) -> Result<Box<dyn BatchStream>, ExecError> {
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let plan = self.plan;
        let node = plan.node(id)?;
        if !node.is_shared() {
            return self.build(node);
        }
        if self.materialized.insert(id) {
            let mut stream = self.build(node)?;
            let parts = drain(stream.as_mut(), self.ctx.chunk_rows)
                .map_err(|e| ExecError::from_op(e, id, node.op.name()))?;
            drop(stream);
            let batch = if parts.is_empty() {
                RowBatch::empty(&node.schema)
            } else {
                RowBatch::concat_rows(parts)
                    .map_err(|e| ExecError::from_op(OpError::Exec(e), id, node.op.name()))?
            };
            tracing::debug!(
                node = %id,
                rows = batch.num_rows(),
                consumers = node.consumers,
                "materialized shared node"
            );
            self.store
                .publish(id, node.fingerprint, batch, node.consumers)?;
        }
        let shared = self.store.take(id)?;
        Ok(Box::new(PinnedCursor {
            _guard: shared.guard(),
            cursor: SharedCursor::new(shared.batch),
        }))
    }

    fn build(&mut self, node: &PhysicalNode) -> Result<Box<dyn BatchStream>, ExecError> {
        let inputs = node
            .inputs
            .iter()
            .map(|i| self.open(*i))
            .collect::<Result<Vec<_>, _>>()?;
        let operator = node.op.name();
        if node.support == StreamingSupport::Materializing {
            tracing::warn!(
                node = %node.id,
                operator,
                "operator cannot stream; materializing its inputs"
            );
        }
        let inner = node
            .op
            .open_stream(inputs, self.ctx)
            .map_err(|e| ExecError::from_op(e, node.id, operator))?;
        self.stats.record_node(operator);
        Ok(Box::new(Tracked {
            inner,
            node: node.id,
            operator,
            batches: 0,
            finished: false,
            cancel: self.cancel.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

/// Batches of one root, pulled on demand.
///
/// An error ends the stream; batches already returned stand. Dropping the
/// stream releases every reservation its operators hold.
pub struct ResultStream {
    inner: Option<Box<dyn BatchStream>>,
    root: NodeId,
    operator: &'static str,
    schema: Schema,
    chunk_rows: usize,
    cancel: CancellationToken,
    stats: Arc<ExecStats>,
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("root", &self.root)
            .field("chunk_rows", &self.chunk_rows)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl ResultStream {
    pub(crate) fn new(
        inner: Box<dyn BatchStream>,
        node: &PhysicalNode,
        chunk_rows: usize,
        cancel: CancellationToken,
        stats: Arc<ExecStats>,
    ) -> Self {
        Self {
            inner: Some(inner),
            root: node.id,
            operator: node.op.name(),
            schema: node.schema.clone(),
            chunk_rows,
            cancel,
            stats,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Token that stops this stream at its next pull.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// Pull everything that is left into one batch.
    pub fn collect_all(self) -> Result<RowBatch, ExecError> {
        let schema = self.schema.clone();
        let parts = self.collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Ok(RowBatch::empty(&schema));
        }
        RowBatch::concat_rows(parts).map_err(ExecError::Invalid)
    }
}

impl Iterator for ResultStream {
    type Item = Result<RowBatch, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.inner.as_mut()?;
        let pulled = match self.cancel.check() {
            Ok(()) => stream.next_batch(self.chunk_rows),
            Err(e) => Err(e),
        };
        match pulled {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.inner = None;
                None
            }
            Err(e) => {
                self.inner = None;
                Some(Err(ExecError::from_op(e, self.root, self.operator)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::plan::{JoinType, SortKey};
    use lazyplan_core::types::Scalar;
    use lazyplan_io::{CountingSource, MemorySource};
    use lazyplan_mem::MemoryBudgetImpl;
    use lazyplan_planner::frame::LazyFrame;
    use lazyplan_planner::lower;

    fn source(rows: i64) -> CountingSource {
        CountingSource::new(
            MemorySource::from_columns("t", vec![("id", (0..rows).map(Scalar::I64).collect())])
                .unwrap(),
        )
    }

    fn stream(lf: &LazyFrame, budget: &MemoryBudgetImpl, chunk: usize) -> ResultStream {
        let plan = lower(&lf.logical_plan().unwrap()).unwrap();
        let ctx = ExecContext::new(budget.clone(), chunk, 2);
        let store = SharedResultStore::new(budget.clone());
        let stats = Arc::new(ExecStats::new());
        let cancel = CancellationToken::new();
        let root = plan.roots[0];
        let inner = StreamingExecutor::new(&plan, &ctx, &store, cancel.clone(), Arc::clone(&stats))
            .open(root)
            .unwrap();
        ResultStream::new(inner, plan.node(root).unwrap(), chunk, cancel, stats)
    }

    #[test]
    fn pulls_in_bounded_chunks() {
        let budget = MemoryBudgetImpl::new(1 << 20);
        let lf = LazyFrame::scan(source(100))
            .unwrap()
            .filter(col("id").lt(lit(50i64)))
            .unwrap();
        let batches: Vec<RowBatch> = stream(&lf, &budget, 16).map(Result::unwrap).collect();
        assert!(batches.iter().all(|b| b.num_rows() <= 16));
        assert_eq!(batches.iter().map(RowBatch::num_rows).sum::<usize>(), 50);
    }

    #[test]
    fn shared_input_is_read_once() {
        let src = source(20);
        let scans = src.stats();
        let base = LazyFrame::scan(src).unwrap();
        let lf = base.join(&base, ["id"], ["id"], JoinType::Inner).unwrap();
        let budget = MemoryBudgetImpl::new(1 << 20);
        let out = stream(&lf, &budget, 8).collect_all().unwrap();
        assert_eq!(out.num_rows(), 20);
        assert_eq!(scans.scans(), 1);
        // The shared scan was held whole, not chunk by chunk.
        let whole = RowBatch::new(vec![lazyplan_core::types::Column::new(
            "id",
            (0..20).map(Scalar::I64).collect(),
        )]);
        assert!(budget.peak_bytes() >= whole.approx_bytes());
        assert_eq!(budget.used_bytes(), 0);
    }

    #[test]
    fn cancellation_stops_the_next_pull() {
        let budget = MemoryBudgetImpl::new(1 << 20);
        let lf = LazyFrame::scan(source(100)).unwrap();
        let mut s = stream(&lf, &budget, 10);
        assert!(s.next().unwrap().is_ok());
        s.cancellation_token().cancel();
        assert!(matches!(s.next(), Some(Err(ExecError::Cancelled))));
        assert!(s.next().is_none());
    }

    #[test]
    fn errors_carry_node_and_batch() {
        let budget = MemoryBudgetImpl::new(1 << 20);
        let lf = LazyFrame::scan(source(100).failing_after(20))
            .unwrap()
            .select([col("id")])
            .unwrap();
        let results: Vec<_> = stream(&lf, &budget, 10).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        match &results[2] {
            Err(ExecError::Execution {
                operator, batch, ..
            }) => {
                assert_eq!(*operator, "scan");
                assert_eq!(*batch, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_sort_spills_to_batch_but_still_streams_out() {
        let budget = MemoryBudgetImpl::new(1 << 20);
        let lf = LazyFrame::scan(source(30))
            .unwrap()
            .sort([SortKey::desc("id")])
            .unwrap();
        let out = stream(&lf, &budget, 7).collect_all().unwrap();
        assert_eq!(out.num_rows(), 30);
        assert_eq!(out.rows()[0], vec![Scalar::I64(29)]);
    }
}
