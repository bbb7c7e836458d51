//! Filter operator: keeps rows where the predicate evaluates to true.
//! Order-preserving; null predicate results drop the row.

use std::sync::Arc;

use lazyplan_core::expr::Expr;
use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;

use crate::eval::filter_batch;
use crate::plan::{Footprint, StreamingSupport};
use crate::stream::BatchStream;
use crate::traits::{single_input, single_stream, ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Filter {
    pub predicate: Expr,
    pub schema: Schema,
}

impl Operator for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, _rows: u64, _bytes: u64) -> Footprint {
        // Filtering is streaming; nothing is retained.
        Footprint::default()
    }

    fn streaming_support(&self) -> StreamingSupport {
        StreamingSupport::Pipelined
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], _ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let input = single_input(inputs, self.name())?;
        filter_batch(&self.predicate, input.clone())
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        _ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        Ok(Box::new(FilterStream {
            input: single_stream(inputs, self.name())?,
            predicate: self.predicate.clone(),
        }))
    }
}

struct FilterStream {
    input: Box<dyn BatchStream>,
    predicate: Expr,
}

impl BatchStream for FilterStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        // Output never exceeds the pulled input, so `max_rows` holds.
        while let Some(batch) = self.input.next_batch(max_rows)? {
            let kept = filter_batch(&self.predicate, batch)?;
            if kept.num_rows() > 0 {
                return Ok(Some(kept));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{drain, MemoryStream};
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::schema::{DataType, Field};
    use lazyplan_core::types::{Column, Scalar};
    use lazyplan_mem::MemoryBudgetImpl;

    #[test]
    fn streaming_skips_batches_with_no_survivors() {
        let input = RowBatch::new(vec![Column::new("n", (0..9).map(Scalar::I64).collect())]);
        let op = Filter {
            predicate: col("n").gt_eq(lit(7i64)),
            schema: Schema::new(vec![Field::new("n", DataType::Int64, false)]),
        };
        let ctx = ExecContext::new(MemoryBudgetImpl::new(1 << 20), 3, 1);
        let source: Box<dyn BatchStream> = Box::new(MemoryStream::new(input.clone()));
        let mut stream = op.open_stream(vec![source], &ctx).unwrap();
        let parts = drain(stream.as_mut(), 3).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], op.eval_batch(&[Arc::new(input)], &ctx).unwrap());
    }
}
