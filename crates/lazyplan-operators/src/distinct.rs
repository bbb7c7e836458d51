//! Distinct operator: keeps the first occurrence of each row (or of each
//! value combination of `subset`), preserving input order.

use std::collections::HashSet;
use std::sync::Arc;

use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::guard::BudgetGuardImpl;

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::BatchStream;
use crate::traits::{single_input, single_stream, ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Distinct {
    pub subset: Option<Vec<String>>,
    pub schema: Schema,
}

impl Distinct {
    fn key_columns(&self) -> Vec<String> {
        self.subset.clone().unwrap_or_else(|| self.schema.names())
    }
}

/// Seen-set of encoded keys; the guard accounts for every stored key.
struct SeenSet {
    keys: Vec<String>,
    seen: HashSet<Vec<u8>>,
    guard: BudgetGuardImpl,
}

impl SeenSet {
    fn retain_new(&mut self, batch: RowBatch) -> Result<RowBatch, OpError> {
        let idx = batch.key_indices(&self.keys).map_err(OpError::Exec)?;
        let mut mask = Vec::with_capacity(batch.num_rows());
        let mut added = 0usize;
        for row in 0..batch.num_rows() {
            let key = batch.row_key(row, &idx);
            let len = key.len();
            let fresh = self.seen.insert(key);
            if fresh {
                added += len + 16;
            }
            mask.push(fresh);
        }
        self.guard.grow(added)?;
        Ok(batch.filter(&mask))
    }
}

impl Operator for Distinct {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, _rows: u64, bytes: u64) -> Footprint {
        Footprint {
            bytes_per_row: bytes / 2 + 16,
            overhead_bytes: 4 * 1024,
        }
    }

    fn streaming_support(&self) -> StreamingSupport {
        StreamingSupport::Blocking
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let input = single_input(inputs, self.name())?;
        let mut seen = SeenSet {
            keys: self.key_columns(),
            seen: HashSet::new(),
            guard: ctx.reserve(0, "distinct")?,
        };
        seen.retain_new(input.clone())
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        Ok(Box::new(DistinctStream {
            input: single_stream(inputs, self.name())?,
            seen: SeenSet {
                keys: self.key_columns(),
                seen: HashSet::new(),
                guard: ctx.reserve(0, "distinct")?,
            },
        }))
    }
}

struct DistinctStream {
    input: Box<dyn BatchStream>,
    seen: SeenSet,
}

impl BatchStream for DistinctStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        while let Some(batch) = self.input.next_batch(max_rows)? {
            let fresh = self.seen.retain_new(batch)?;
            if fresh.num_rows() > 0 {
                return Ok(Some(fresh));
            }
        }
        Ok(None)
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
                "a",
                vec![
                    Scalar::I64(1),
                    Scalar::I64(1),
                    Scalar::Null,
                    Scalar::I64(2),
                    Scalar::Null,
                ],
            ),
            Column::new(
                "b",
                vec![
                    Scalar::Str("x".into()),
                    Scalar::Str("y".into()),
                    Scalar::Str("x".into()),
                    Scalar::Str("x".into()),
                    Scalar::Str("x".into()),
                ],
            ),
        ])
    }

    fn distinct(subset: Option<Vec<String>>) -> Distinct {
        Distinct {
            subset,
            schema: Schema::new(vec![
                Field::new("a", DataType::Int64, true),
                Field::new("b", DataType::Utf8, false),
            ]),
        }
    }

    fn ctx() -> ExecContext {
        ExecContext::new(MemoryBudgetImpl::new(1 << 20), 2, 1)
    }

    #[test]
    fn keeps_first_occurrence_in_order() {
        let all = distinct(None).eval_batch(&[Arc::new(input())], &ctx()).unwrap();
        assert_eq!(all.num_rows(), 4);
        let by_a = distinct(Some(vec!["a".into()]))
            .eval_batch(&[Arc::new(input())], &ctx())
            .unwrap();
        assert_eq!(
            by_a.column("b").unwrap().values,
            vec![Scalar::Str("x".into()), Scalar::Str("x".into()), Scalar::Str("x".into())]
        );
        assert_eq!(
            by_a.column("a").unwrap().values,
            vec![Scalar::I64(1), Scalar::Null, Scalar::I64(2)]
        );
    }

    #[test]
    fn streaming_matches_batch() {
        let op = distinct(Some(vec!["b".into()]));
        let batch = op.eval_batch(&[Arc::new(input())], &ctx()).unwrap();
        let source: Box<dyn BatchStream> = Box::new(MemoryStream::new(input()));
        let mut stream = op.open_stream(vec![source], &ctx()).unwrap();
        let streamed = RowBatch::concat_rows(drain(stream.as_mut(), 2).unwrap()).unwrap();
        assert_eq!(batch, streamed);
    }
}
