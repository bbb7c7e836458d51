//! Slice operator (`head`, `slice`, `tail`).
//!
//! A non-negative offset streams and stops pulling once `len` rows are out.
//! A negative offset counts from the end: the last `|offset|` rows are kept in
//! a ring until the input is exhausted.

use std::sync::Arc;

use lazyplan_core::budget::BudgetGuard;
use lazyplan_core::prelude::Schema;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::guard::BudgetGuardImpl;

use crate::plan::{Footprint, StreamingSupport};
use crate::stream::{BatchQueue, BatchStream};
use crate::traits::{single_input, single_stream, ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Slice {
    pub offset: i64,
    pub len: usize,
    pub schema: Schema,
}

impl Slice {
    /// `[start, start + len)` over an input of `total` rows.
    fn window(&self, total: usize) -> (usize, usize) {
        let start = if self.offset >= 0 {
            usize::try_from(self.offset).unwrap_or(usize::MAX)
        } else {
            let back = usize::try_from(self.offset.unsigned_abs()).unwrap_or(usize::MAX);
            total.saturating_sub(back)
        };
        (start.min(total), self.len)
    }
}

impl Operator for Slice {
    fn name(&self) -> &'static str {
        if self.offset < 0 {
            "tail"
        } else {
            "slice"
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, _rows: u64, bytes: u64) -> Footprint {
        if self.offset < 0 {
            Footprint {
                bytes_per_row: 0,
                overhead_bytes: self.offset.unsigned_abs().saturating_mul(bytes.max(1)),
            }
        } else {
            Footprint::default()
        }
    }

    fn streaming_support(&self) -> StreamingSupport {
        if self.offset < 0 {
            StreamingSupport::Blocking
        } else {
            StreamingSupport::Pipelined
        }
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], _ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let input = single_input(inputs, self.name())?;
        let (start, len) = self.window(input.num_rows());
        Ok(input.slice(start, len))
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        let input = single_stream(inputs, self.name())?;
        if self.offset >= 0 {
            return Ok(Box::new(HeadStream {
                input: Some(input),
                skip: usize::try_from(self.offset).unwrap_or(usize::MAX),
                remaining: self.len,
            }));
        }
        Ok(Box::new(TailStream {
            input: Some(input),
            keep: usize::try_from(self.offset.unsigned_abs()).unwrap_or(usize::MAX),
            len: self.len,
            chunk_rows: ctx.chunk_rows,
            ring: BatchQueue::new(),
            guard: ctx.reserve(0, "tail")?,
        }))
    }
}

struct HeadStream {
    /// Dropped once `remaining` hits zero so upstream stops reading.
    input: Option<Box<dyn BatchStream>>,
    skip: usize,
    remaining: usize,
}

impl BatchStream for HeadStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        loop {
            if self.remaining == 0 {
                self.input = None;
            }
            let Some(input) = self.input.as_mut() else {
                return Ok(None);
            };
            let Some(batch) = input.next_batch(max_rows)? else {
                self.input = None;
                return Ok(None);
            };
            let n = batch.num_rows();
            if self.skip >= n {
                self.skip -= n;
                continue;
            }
            let out = batch.slice(self.skip, self.remaining);
            self.skip = 0;
            self.remaining -= out.num_rows();
            if out.num_rows() > 0 {
                return Ok(Some(out));
            }
        }
    }
}

struct TailStream {
    input: Option<Box<dyn BatchStream>>,
    keep: usize,
    len: usize,
    chunk_rows: usize,
    /// The last `keep` rows seen so far.
    ring: BatchQueue,
    guard: BudgetGuardImpl,
}

impl BatchStream for TailStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        if let Some(mut input) = self.input.take() {
            while let Some(batch) = input.next_batch(self.chunk_rows)? {
                self.ring.push(batch);
                let excess = self.ring.len_rows().saturating_sub(self.keep);
                self.ring.skip(excess);
                let need = self.ring.approx_bytes();
                let held = self.guard.bytes();
                if need > held {
                    self.guard.grow(need - held)?;
                } else {
                    self.guard.try_resize(need);
                }
            }
            self.ring.truncate(self.len);
        }
        Ok(self.ring.pop(max_rows))
    }
}
