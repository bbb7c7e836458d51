//! Projection operator: evaluates one expression per output column.
//!
//! Literal-only expressions broadcast to the input's row count.

use std::sync::Arc;

use lazyplan_core::expr::Expr;
use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;

use crate::eval::{conform, evaluate};
use crate::plan::{Footprint, StreamingSupport};
use crate::stream::BatchStream;
use crate::traits::{single_input, single_stream, ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Project {
    pub exprs: Vec<Expr>,
    pub schema: Schema,
}

fn project_batch(exprs: &[Expr], schema: &Schema, input: &RowBatch) -> Result<RowBatch, OpError> {
    let columns = exprs
        .iter()
        .enumerate()
        .map(|(i, e)| conform(evaluate(e, input)?, schema, i))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RowBatch::new(columns))
}

impl Operator for Project {
    fn name(&self) -> &'static str {
        "project"
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
        let input = single_input(inputs, self.name())?;
        project_batch(&self.exprs, &self.schema, input)
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        _ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        Ok(Box::new(ProjectStream {
            input: single_stream(inputs, self.name())?,
            exprs: self.exprs.clone(),
            schema: self.schema.clone(),
        }))
    }
}

struct ProjectStream {
    input: Box<dyn BatchStream>,
    exprs: Vec<Expr>,
    schema: Schema,
}

impl BatchStream for ProjectStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        match self.input.next_batch(max_rows)? {
            Some(batch) => Ok(Some(project_batch(&self.exprs, &self.schema, &batch)?)),
            None => Ok(None),
        }
    }
}
