//! Union operator: concatenates its inputs in input order.

use std::collections::VecDeque;
use std::sync::Arc;

use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::BatchStream;
use crate::traits::{ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Union {
    pub schema: Schema,
}

impl Operator for Union {
    fn name(&self) -> &'static str {
        "union"
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, _rows: u64, _bytes: u64) -> Footprint {
        Footprint::default()
    }

    fn streaming_support(&self) -> StreamingSupport {
        StreamingSupport::Pipelined
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], _ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let parts: Vec<RowBatch> = inputs
            .iter()
            .filter(|b| b.num_rows() > 0)
            .map(|b| b.as_ref().clone().with_names(&self.schema))
            .collect();
        if parts.is_empty() {
            return Ok(RowBatch::empty(&self.schema));
        }
        RowBatch::concat_rows(parts).map_err(OpError::Exec)
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        _ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        Ok(Box::new(UnionStream {
            inputs: inputs.into(),
            schema: self.schema.clone(),
        }))
    }
}

struct UnionStream {
    inputs: VecDeque<Box<dyn BatchStream>>,
    schema: Schema,
}

impl BatchStream for UnionStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        while let Some(front) = self.inputs.front_mut() {
            match front.next_batch(max_rows)? {
                Some(batch) => return Ok(Some(batch.with_names(&self.schema))),
                None => {
                    self.inputs.pop_front();
                }
            }
        }
        Ok(None)
    }
}
