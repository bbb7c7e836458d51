//! Hash join (`Inner`, `Left`, `Semi`, `Anti`).
//!
//! The right input is the build side; the left input is probed in order, so
//! output preserves left row order. Null keys never match. Numeric keys of
//! different widths or kinds are cast to their common type before hashing.

mod hash;

use std::sync::Arc;

use lazyplan_core::plan::JoinType;
use lazyplan_core::prelude::Schema;
use lazyplan_core::schema::DataType;
use lazyplan_core::types::RowBatch;

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::{BatchQueue, BatchStream};
use crate::traits::{ExecContext, OpError, Operator};

pub use hash::JoinTable;

#[derive(Debug)]
pub struct HashJoin {
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    pub how: JoinType,
    /// Common type per key pair; keys are compared after casting to it.
    pub key_types: Vec<DataType>,
    pub schema: Schema,
}

impl HashJoin {
    pub fn new(
        left: &Schema,
        right: &Schema,
        left_on: Vec<String>,
        right_on: Vec<String>,
        how: JoinType,
        schema: Schema,
    ) -> Result<Self, OpError> {
        let key_types = left_on
            .iter()
            .zip(right_on.iter())
            .map(|(l, r)| {
                let lt = left.require(l)?.data_type;
                let rt = right.require(r)?.data_type;
                DataType::unify(lt, rt).ok_or_else(|| {
                    OpError::Schema(format!("join keys '{l}' ({lt}) and '{r}' ({rt}) do not unify"))
                })
            })
            .collect::<Result<Vec<_>, OpError>>()?;
        Ok(Self {
            left_on,
            right_on,
            how,
            key_types,
            schema,
        })
    }

    fn two_inputs<'a>(&self, inputs: &'a [Arc<RowBatch>]) -> Result<(&'a RowBatch, &'a RowBatch), OpError> {
        match inputs {
            [l, r] => Ok((l.as_ref(), r.as_ref())),
            _ => Err(OpError::Exec(format!(
                "join expects two inputs, got {}",
                inputs.len()
            ))),
        }
    }
}

impl Operator for HashJoin {
    fn name(&self) -> &'static str {
        "hash_join"
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, _rows: u64, bytes: u64) -> Footprint {
        // Build side rows plus their index entries.
        Footprint {
            bytes_per_row: bytes + 24,
            overhead_bytes: 64 * 1024,
        }
    }

    fn streaming_support(&self) -> StreamingSupport {
        StreamingSupport::Blocking
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let (left, right) = self.two_inputs(inputs)?;
        let mut table = JoinTable::new(self, ctx)?;
        table.insert(right.clone())?;
        let out = table.probe(self, left)?;
        if out.num_rows() == 0 {
            return Ok(RowBatch::empty(&self.schema));
        }
        Ok(out)
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        let n = inputs.len();
        let mut it = inputs.into_iter();
        let (Some(left), Some(right), None) = (it.next(), it.next(), it.next()) else {
            return Err(OpError::Exec(format!("join expects two input streams, got {n}")));
        };
        Ok(Box::new(HashJoinStream {
            op: HashJoin {
                left_on: self.left_on.clone(),
                right_on: self.right_on.clone(),
                how: self.how,
                key_types: self.key_types.clone(),
                schema: self.schema.clone(),
            },
            left,
            right: Some(right),
            table: JoinTable::new(self, ctx)?,
            chunk_rows: ctx.chunk_rows,
            pending: BatchQueue::new(),
            done: false,
        }))
    }
}

struct HashJoinStream {
    op: HashJoin,
    left: Box<dyn BatchStream>,
    /// Drained into `table` on the first pull.
    right: Option<Box<dyn BatchStream>>,
    table: JoinTable,
    chunk_rows: usize,
    pending: BatchQueue,
    done: bool,
}

impl BatchStream for HashJoinStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        if let Some(mut right) = self.right.take() {
            while let Some(batch) = right.next_batch(self.chunk_rows)? {
                self.table.insert(batch)?;
            }
            tracing::trace!(build_rows = self.table.len(), "join build side complete");
        }
        while self.pending.is_empty() && !self.done {
            match self.left.next_batch(max_rows)? {
                Some(batch) => {
                    let out = self.table.probe(&self.op, &batch)?;
                    self.pending.push(out);
                }
                None => self.done = true,
            }
        }
        Ok(self.pending.pop(max_rows))
    }
}
