//! Pull-based streaming contract and small stream building blocks.

use std::collections::VecDeque;
use std::sync::Arc;

use lazyplan_core::types::RowBatch;
use lazyplan_mem::guard::BudgetGuardImpl;

use crate::traits::OpError;

/// A lazily produced sequence of batches.
///
/// `next_batch(max_rows)` returns a non-empty batch of at most `max_rows`
/// rows, or `None` once the stream is exhausted. After an error the stream
/// must not be pulled again.
pub trait BatchStream: Send {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError>;
}

/// Pull everything out of a stream.
pub fn drain(stream: &mut dyn BatchStream, chunk_rows: usize) -> Result<Vec<RowBatch>, OpError> {
    let mut out = Vec::new();
    while let Some(batch) = stream.next_batch(chunk_rows)? {
        out.push(batch);
    }
    Ok(out)
}

/// FIFO of pending rows that hands them out in bounded slices.
#[derive(Debug, Default)]
pub struct BatchQueue {
    batches: VecDeque<RowBatch>,
    rows: usize,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: RowBatch) {
        if batch.num_rows() > 0 {
            self.rows += batch.num_rows();
            self.batches.push_back(batch);
        }
    }

    pub fn len_rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Next slice of at most `max_rows` rows from the front batch.
    pub fn pop(&mut self, max_rows: usize) -> Option<RowBatch> {
        let max_rows = max_rows.max(1);
        let front = self.batches.pop_front()?;
        let n = front.num_rows();
        if n <= max_rows {
            self.rows -= n;
            return Some(front);
        }
        let head = front.slice(0, max_rows);
        self.batches.push_front(front.slice(max_rows, n - max_rows));
        self.rows -= max_rows;
        Some(head)
    }

    /// Drop the first `rows` rows.
    pub fn skip(&mut self, rows: usize) {
        let mut left = rows;
        while left > 0 {
            match self.pop(left) {
                Some(dropped) => left -= dropped.num_rows(),
                None => break,
            }
        }
    }

    /// Keep only the first `rows` rows.
    pub fn truncate(&mut self, rows: usize) {
        let mut kept = BatchQueue::new();
        while kept.len_rows() < rows {
            match self.pop(rows - kept.len_rows()) {
                Some(part) => kept.push(part),
                None => break,
            }
        }
        *self = kept;
    }

    pub fn approx_bytes(&self) -> usize {
        self.batches.iter().map(RowBatch::approx_bytes).sum()
    }
}

/// Replays an owned, already computed batch. Optionally holds the budget
/// guard that accounts for it until the stream is dropped.
pub struct MemoryStream {
    queue: BatchQueue,
    _guard: Option<BudgetGuardImpl>,
}

impl MemoryStream {
    pub fn new(batch: RowBatch) -> Self {
        let mut queue = BatchQueue::new();
        queue.push(batch);
        Self {
            queue,
            _guard: None,
        }
    }

    pub fn with_guard(mut self, guard: BudgetGuardImpl) -> Self {
        self._guard = Some(guard);
        self
    }
}

impl BatchStream for MemoryStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        Ok(self.queue.pop(max_rows))
    }
}

/// Per-consumer read cursor over a shared, immutable result.
pub struct SharedCursor {
    data: Arc<RowBatch>,
    position: usize,
}

impl SharedCursor {
    pub fn new(data: Arc<RowBatch>) -> Self {
        Self { data, position: 0 }
    }
}

impl BatchStream for SharedCursor {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        let total = self.data.num_rows();
        if self.position >= total {
            return Ok(None);
        }
        let len = max_rows.max(1).min(total - self.position);
        let out = self.data.slice(self.position, len);
        self.position += len;
        Ok(Some(out))
    }
}
