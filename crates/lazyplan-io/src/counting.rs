//! Instrumented wrapper: counts scans and rows handed out, and remembers the
//! last request so callers can see which pushdowns reached the source.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use lazyplan_core::error::{Error as CoreError, Result as CoreResult};
use lazyplan_core::schema::Schema;
use lazyplan_core::source::{BatchReader, DataSource, ScanRequest};
use lazyplan_core::types::RowBatch;

/// Counters shared between a `CountingSource` and whoever inspects it.
#[derive(Default)]
pub struct ScanStats {
    scans: AtomicUsize,
    rows: AtomicUsize,
    last_request: Mutex<Option<ScanRequest>>,
}

impl fmt::Debug for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanStats")
            .field("scans", &self.scans())
            .field("rows", &self.rows_read())
            .finish()
    }
}

impl ScanStats {
    /// Number of `scan` calls.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Rows returned by all readers so far.
    pub fn rows_read(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ScanRequest> {
        self.last_request.lock().clone()
    }

    pub fn reset(&self) {
        self.scans.store(0, Ordering::SeqCst);
        self.rows.store(0, Ordering::SeqCst);
        *self.last_request.lock() = None;
    }
}

pub struct CountingSource {
    inner: Arc<dyn DataSource>,
    stats: Arc<ScanStats>,
    fail_after_rows: Option<usize>,
}

impl fmt::Debug for CountingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CountingSource({})", self.inner.identity())
    }
}

impl CountingSource {
    pub fn new<S: DataSource + 'static>(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
            stats: Arc::new(ScanStats::default()),
            fail_after_rows: None,
        }
    }

    /// Make every reader fail once it has produced `rows` rows.
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after_rows = Some(rows);
        self
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }
}

struct CountingReader {
    inner: Box<dyn BatchReader>,
    stats: Arc<ScanStats>,
    produced: usize,
    fail_after_rows: Option<usize>,
    identity: String,
}

impl BatchReader for CountingReader {
    fn next_batch(&mut self) -> CoreResult<Option<RowBatch>> {
        if let Some(limit) = self.fail_after_rows {
            if self.produced >= limit {
                return Err(CoreError::Source(format!(
                    "{}: injected failure after {limit} rows",
                    self.identity
                )));
            }
        }
        let batch = self.inner.next_batch()?;
        if let Some(b) = &batch {
            self.produced += b.num_rows();
            self.stats.rows.fetch_add(b.num_rows(), Ordering::SeqCst);
        }
        Ok(batch)
    }
}

impl DataSource for CountingSource {
    fn identity(&self) -> String {
        self.inner.identity()
    }

    fn schema(&self) -> Schema {
        self.inner.schema()
    }

    fn row_count_hint(&self) -> Option<usize> {
        self.inner.row_count_hint()
    }

    fn scan(&self, request: &ScanRequest) -> CoreResult<Box<dyn BatchReader>> {
        self.stats.scans.fetch_add(1, Ordering::SeqCst);
        *self.stats.last_request.lock() = Some(request.clone());
        Ok(Box::new(CountingReader {
            inner: self.inner.scan(request)?,
            stats: Arc::clone(&self.stats),
            produced: 0,
            fail_after_rows: self.fail_after_rows,
            identity: self.inner.identity(),
        }))
    }
}
