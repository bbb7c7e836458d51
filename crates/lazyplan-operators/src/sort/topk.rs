//! Streaming top-k: keeps the best `k` rows seen so far.

use lazyplan_core::budget::BudgetGuard;
use lazyplan_core::plan::SortKey;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::guard::BudgetGuardImpl;

use crate::stream::{BatchQueue, BatchStream};
use crate::traits::{ExecContext, OpError};

pub struct TopK {
    input: Option<Box<dyn BatchStream>>,
    by: Vec<SortKey>,
    k: usize,
    chunk_rows: usize,
    output: BatchQueue,
    guard: BudgetGuardImpl,
}

impl TopK {
    pub fn new(
        input: Box<dyn BatchStream>,
        by: Vec<SortKey>,
        k: usize,
        ctx: &ExecContext,
    ) -> Result<Self, OpError> {
        Ok(Self {
            input: Some(input),
            by,
            k,
            chunk_rows: ctx.chunk_rows,
            output: BatchQueue::new(),
            guard: ctx.reserve(0, "top_k")?,
        })
    }

    /// Merge `incoming` into `best`, keeping at most `k` rows. Rows already in
    /// `best` precede `incoming`, so the stable sort keeps ties in input order.
    fn merge(&mut self, best: Option<RowBatch>, incoming: RowBatch) -> Result<RowBatch, OpError> {
        let combined = match best {
            Some(best) => RowBatch::concat_rows(vec![best, incoming]).map_err(OpError::Exec)?,
            None => incoming,
        };
        let kept = combined
            .sort_by_keys(&self.by)
            .map_err(OpError::Exec)?
            .slice(0, self.k);
        let need = kept.approx_bytes();
        let held = self.guard.bytes();
        if need > held {
            self.guard.grow(need - held)?;
        } else {
            self.guard.try_resize(need);
        }
        Ok(kept)
    }
}

impl BatchStream for TopK {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        if let Some(mut input) = self.input.take() {
            let mut best: Option<RowBatch> = None;
            if self.k > 0 {
                while let Some(batch) = input.next_batch(self.chunk_rows)? {
                    best = Some(self.merge(best, batch)?);
                }
            }
            if let Some(best) = best {
                self.output.push(best);
            }
        }
        Ok(self.output.pop(max_rows))
    }
}
