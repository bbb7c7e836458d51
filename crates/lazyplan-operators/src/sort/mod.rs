//! Sort operator.
//!
//! Without a limit the sort needs its whole input and runs in batch form even
//! under streaming. With a limit it keeps a bounded top-k buffer and streams.
//! Both forms are stable: ties keep input order.

mod topk;

use std::sync::Arc;

use lazyplan_core::plan::SortKey;
use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::BatchStream;
use crate::traits::{materialize_stream, single_input, single_stream, ExecContext, OpError, Operator};

pub use topk::TopK;

#[derive(Debug)]
pub struct Sort {
    pub by: Vec<SortKey>,
    pub limit: Option<usize>,
    pub schema: Schema,
}

impl Operator for Sort {
    fn name(&self) -> &'static str {
        if self.limit.is_some() {
            "top_k"
        } else {
            "sort"
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, rows: u64, bytes: u64) -> Footprint {
        match self.limit {
            Some(k) => Footprint {
                bytes_per_row: 0,
                overhead_bytes: (k as u64).min(rows).saturating_mul(bytes.max(1)) * 2,
            },
            None => Footprint {
                bytes_per_row: bytes + 8,
                overhead_bytes: 0,
            },
        }
    }

    fn streaming_support(&self) -> StreamingSupport {
        if self.limit.is_some() {
            StreamingSupport::Blocking
        } else {
            StreamingSupport::Materializing
        }
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], _ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let input = single_input(inputs, self.name())?;
        let mut sorted = input.sort_by_keys(&self.by).map_err(OpError::Exec)?;
        if let Some(k) = self.limit {
            sorted = sorted.slice(0, k);
        }
        Ok(sorted)
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        let input = single_stream(inputs, self.name())?;
        match self.limit {
            Some(k) => Ok(Box::new(TopK::new(input, self.by.clone(), k, ctx)?)),
            None => materialize_stream(self, vec![input], ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{drain, MemoryStream};
    use lazyplan_core::schema::{DataType, Field};
    use lazyplan_core::types::{Column, Scalar};
    use lazyplan_mem::MemoryBudgetImpl;

    fn input() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "k",
                vec![
                    Scalar::I64(3),
                    Scalar::Null,
                    Scalar::I64(1),
                    Scalar::I64(3),
                    Scalar::I64(2),
                ],
            ),
            Column::new("pos", (0..5).map(Scalar::I64).collect()),
        ])
    }

    fn sort(by: Vec<SortKey>, limit: Option<usize>) -> Sort {
        Sort {
            by,
            limit,
            schema: Schema::new(vec![
                Field::new("k", DataType::Int64, true),
                Field::new("pos", DataType::Int64, false),
            ]),
        }
    }

    fn positions(batch: &RowBatch) -> Vec<Scalar> {
        batch.column("pos").unwrap().values.clone()
    }

    fn ctx() -> ExecContext {
        ExecContext::new(MemoryBudgetImpl::new(1 << 20), 2, 1)
    }

    #[test]
    fn descending_nulls_last_is_stable() {
        let op = sort(vec![SortKey::desc("k").nulls_last()], None);
        let out = op.eval_batch(&[Arc::new(input())], &ctx()).unwrap();
        assert_eq!(
            positions(&out),
            [0, 3, 4, 2, 1].into_iter().map(Scalar::I64).collect::<Vec<_>>()
        );
    }

    #[test]
    fn top_k_streaming_matches_batch_prefix() {
        let op = sort(vec![SortKey::desc("k").nulls_last()], Some(3));
        assert_eq!(op.streaming_support(), StreamingSupport::Blocking);
        let batch = op.eval_batch(&[Arc::new(input())], &ctx()).unwrap();
        let source: Box<dyn BatchStream> = Box::new(MemoryStream::new(input()));
        let mut stream = op.open_stream(vec![source], &ctx()).unwrap();
        let streamed = RowBatch::concat_rows(drain(stream.as_mut(), 2).unwrap()).unwrap();
        assert_eq!(streamed, batch);
        assert_eq!(streamed.num_rows(), 3);
    }

    #[test]
    fn full_sort_is_materializing() {
        let op = sort(vec![SortKey::asc("k")], None);
        assert_eq!(op.streaming_support(), StreamingSupport::Materializing);
        let source: Box<dyn BatchStream> = Box::new(MemoryStream::new(input()));
        let mut stream = op.open_stream(vec![source], &ctx()).unwrap();
        let out = RowBatch::concat_rows(drain(stream.as_mut(), 10).unwrap()).unwrap();
        assert_eq!(out.column("k").unwrap().values[0], Scalar::Null);
    }
}
