//! Data-source contract consumed by `Scan` nodes.
//!
//! Sources are opaque to the planner except for their identity (used in plan
//! fingerprints) and their schema. Pushdowns in a [`ScanRequest`] are hints: a
//! source may honour or ignore each of them, and the engine re-applies the
//! predicate, then the limit, then the projection on whatever comes back.
//! A source that ignores the predicate must also ignore the limit.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::schema::Schema;
use crate::types::RowBatch;

/// What a scan asks of its source.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Columns the scan needs (projection plus predicate columns). `None` = all.
    pub projection: Option<Vec<String>>,
    pub predicate: Option<Expr>,
    /// Row limit applied after the predicate.
    pub limit: Option<usize>,
    /// Preferred rows per batch.
    pub chunk_rows: usize,
}

impl ScanRequest {
    pub fn full(chunk_rows: usize) -> Self {
        Self {
            projection: None,
            predicate: None,
            limit: None,
            chunk_rows,
        }
    }
}

/// Pull-based reader over one scan.
pub trait BatchReader: Send {
    /// Next chunk, or `None` when exhausted.
    fn next_batch(&mut self) -> Result<Option<RowBatch>>;
}

pub trait DataSource: Send + Sync + fmt::Debug {
    /// Stable identity. Two sources with the same identity are assumed to
    /// produce the same data, so scans of them can be merged.
    fn identity(&self) -> String;

    fn schema(&self) -> Schema;

    /// Cheap row-count estimate for the cost model.
    fn row_count_hint(&self) -> Option<usize> {
        None
    }

    fn scan(&self, request: &ScanRequest) -> Result<Box<dyn BatchReader>>;

    /// Read the whole (pushed-down) result as one batch.
    fn materialize(&self, request: &ScanRequest) -> Result<RowBatch> {
        let mut reader = self.scan(request)?;
        let mut parts = Vec::new();
        while let Some(batch) = reader.next_batch()? {
            parts.push(batch);
        }
        if parts.is_empty() {
            return Ok(RowBatch::empty(&self.schema()));
        }
        RowBatch::concat_rows(parts).map_err(Error::Source)
    }
}

/// Shared handle to a source, compared and hashed by identity.
#[derive(Clone)]
pub struct SourceRef(Arc<dyn DataSource>);

impl SourceRef {
    pub fn new<S: DataSource + 'static>(source: S) -> Self {
        Self(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn DataSource>) -> Self {
        Self(source)
    }

    pub fn identity(&self) -> String {
        self.0.identity()
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.0
    }
}

impl std::ops::Deref for SourceRef {
    type Target = dyn DataSource;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceRef({})", self.0.identity())
    }
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.identity() == other.identity()
    }
}

impl Serialize for SourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.identity())
    }
}
