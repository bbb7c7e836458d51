//! Scan operator: reads a `DataSource` and re-applies the pushed-down
//! predicate, then the limit, then the projection.

use std::sync::Arc;

use lazyplan_core::expr::Expr;
use lazyplan_core::prelude::Schema;
use lazyplan_core::source::{BatchReader, ScanRequest, SourceRef};
use lazyplan_core::types::RowBatch;

use crate::eval::filter_batch;
use crate::plan::{Footprint, StreamingSupport};
use crate::stream::{BatchQueue, BatchStream};
use crate::traits::{ExecContext, OpError, Operator};

#[derive(Debug)]
pub struct Scan {
    pub source: SourceRef,
    pub projection: Option<Vec<String>>,
    pub predicate: Option<Expr>,
    pub limit: Option<usize>,
    pub schema: Schema,
}

impl Scan {
    /// Columns asked from the source: the projection plus predicate columns.
    fn request(&self, chunk_rows: usize) -> ScanRequest {
        let projection = self.projection.as_ref().map(|cols| {
            let mut wanted = cols.clone();
            if let Some(pred) = &self.predicate {
                for c in pred.columns() {
                    if !wanted.contains(&c) {
                        wanted.push(c);
                    }
                }
            }
            wanted
        });
        ScanRequest {
            projection,
            predicate: self.predicate.clone(),
            limit: self.limit,
            chunk_rows,
        }
    }

    fn finish_chunk(&self, batch: RowBatch, remaining: &mut Option<usize>) -> Result<RowBatch, OpError> {
        let mut batch = match &self.predicate {
            Some(pred) => filter_batch(pred, batch)?,
            None => batch,
        };
        if let Some(left) = remaining {
            if batch.num_rows() > *left {
                batch = batch.slice(0, *left);
            }
            *left -= batch.num_rows();
        }
        batch
            .project(&self.schema.names())
            .map_err(|e| OpError::Source(format!("{}: {e}", self.source.identity())))
    }
}

impl Operator for Scan {
    fn name(&self) -> &'static str {
        "scan"
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

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], ctx: &ExecContext) -> Result<RowBatch, OpError> {
        if !inputs.is_empty() {
            return Err(OpError::Exec("scan takes no inputs".into()));
        }
        let raw = self.source.materialize(&self.request(ctx.chunk_rows))?;
        let mut remaining = self.limit;
        let out = self.finish_chunk(raw, &mut remaining)?;
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
        if !inputs.is_empty() {
            return Err(OpError::Exec("scan takes no inputs".into()));
        }
        let reader = self.source.scan(&self.request(ctx.chunk_rows))?;
        Ok(Box::new(ScanStream {
            scan: Scan {
                source: self.source.clone(),
                projection: self.projection.clone(),
                predicate: self.predicate.clone(),
                limit: self.limit,
                schema: self.schema.clone(),
            },
            reader: Some(reader),
            remaining: self.limit,
            pending: BatchQueue::new(),
        }))
    }
}

struct ScanStream {
    scan: Scan,
    /// Dropped once exhausted or the limit is reached.
    reader: Option<Box<dyn BatchReader>>,
    remaining: Option<usize>,
    pending: BatchQueue,
}

impl BatchStream for ScanStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        while self.pending.is_empty() {
            if self.remaining == Some(0) {
                self.reader = None;
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            match reader.next_batch()? {
                Some(raw) => {
                    let chunk = self.scan.finish_chunk(raw, &mut self.remaining)?;
                    self.pending.push(chunk);
                }
                None => self.reader = None,
            }
        }
        Ok(self.pending.pop(max_rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::drain;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::schema::{DataType, Field};
    use lazyplan_core::types::Scalar;
    use lazyplan_io::{CountingSource, MemorySource};
    use lazyplan_mem::MemoryBudgetImpl;

    fn scan(limit: Option<usize>) -> (Scan, Arc<lazyplan_io::ScanStats>) {
        let mem = MemorySource::from_columns(
            "nums",
            vec![
                ("n", (0..20).map(Scalar::I64).collect()),
                ("tag", (0..20).map(|i| Scalar::Str(format!("t{}", i % 3))).collect()),
            ],
        )
        .unwrap();
        let counting = CountingSource::new(mem);
        let stats = counting.stats();
        let scan = Scan {
            source: SourceRef::new(counting),
            projection: Some(vec!["tag".into()]),
            predicate: Some(col("n").gt_eq(lit(10i64))),
            limit,
            schema: Schema::new(vec![Field::new("tag", DataType::Utf8, false)]),
        };
        (scan, stats)
    }

    fn ctx() -> ExecContext {
        ExecContext::new(MemoryBudgetImpl::new(1 << 20), 4, 2)
    }

    #[test]
    fn reapplies_predicate_limit_and_projection() {
        let (scan, stats) = scan(Some(3));
        let out = scan.eval_batch(&[], &ctx()).unwrap();
        assert_eq!(out.column_names(), vec!["tag"]);
        assert_eq!(out.num_rows(), 3);
        let req = stats.last_request().unwrap();
        assert_eq!(req.projection, Some(vec!["tag".to_string(), "n".to_string()]));
    }

    #[test]
    fn streaming_stops_reading_at_the_limit() {
        let (scan, stats) = scan(Some(2));
        let mut stream = scan.open_stream(vec![], &ctx()).unwrap();
        let parts = drain(stream.as_mut(), 1).unwrap();
        assert_eq!(parts.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
        assert!(stats.rows_read() < 20);
    }
}
