//! In-memory source for tests and embedding.
//!
//! Honours the projection and the chunk size. It does not evaluate predicates,
//! so it honours `limit` only when the request carries no predicate.
//!
//! Identity is the name plus a content hash of schema and rows: two tables
//! share scans only when they hold the same data, whatever they are called.

use std::sync::Arc;

use lazyplan_core::error::Result as CoreResult;
use lazyplan_core::hash::hash_serde;
use lazyplan_core::schema::{DataType, Field, Schema};
use lazyplan_core::source::{BatchReader, DataSource, ScanRequest};
use lazyplan_core::types::{Column, RowBatch, Scalar};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    identity: String,
    schema: Schema,
    data: Arc<RowBatch>,
}

impl MemorySource {
    /// Build from a batch, inferring each column's type from its first
    /// non-null value. All-null columns get `DataType::Null`.
    pub fn new(name: impl Into<String>, data: RowBatch) -> Result<Self> {
        let fields = data
            .columns
            .iter()
            .map(|c| {
                let dtype = c
                    .values
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Scalar::data_type)
                    .unwrap_or(DataType::Null);
                let nullable = c.values.iter().any(Scalar::is_null);
                Field::new(c.name.clone(), dtype, nullable)
            })
            .collect();
        Self::with_schema(name, Schema::new(fields), data)
    }

    /// Build with an explicit schema; every value must match its column type.
    pub fn with_schema(name: impl Into<String>, schema: Schema, data: RowBatch) -> Result<Self> {
        schema.check_unique_names()?;
        if schema.len() != data.num_columns() {
            return Err(Error::Schema(format!(
                "schema has {} fields, data has {} columns",
                schema.len(),
                data.num_columns()
            )));
        }
        let rows = data.num_rows();
        for (field, column) in schema.fields.iter().zip(data.columns.iter()) {
            if field.name != column.name {
                return Err(Error::Schema(format!(
                    "column '{}' does not match field '{}'",
                    column.name, field.name
                )));
            }
            if column.len() != rows {
                return Err(Error::Schema(format!(
                    "column '{}' has {} values, expected {rows}",
                    column.name,
                    column.len()
                )));
            }
            for v in &column.values {
                if !v.is_null() && v.data_type() != field.data_type {
                    return Err(Error::Schema(format!(
                        "column '{}' holds a {} value but is declared {}",
                        column.name,
                        v.data_type(),
                        field.data_type
                    )));
                }
                if v.is_null() && !field.nullable {
                    return Err(Error::Schema(format!(
                        "column '{}' is not nullable but holds nulls",
                        column.name
                    )));
                }
            }
        }
        let name = name.into();
        let content = hash_serde(&(&schema, &data))?;
        Ok(Self {
            identity: format!("memory://{name}@{}", content.short()),
            name,
            schema,
            data: Arc::new(data),
        })
    }

    /// Convenience: `(name, values)` pairs, types inferred.
    pub fn from_columns<S: Into<String>>(
        name: impl Into<String>,
        columns: Vec<(S, Vec<Scalar>)>,
    ) -> Result<Self> {
        let batch = RowBatch::new(
            columns
                .into_iter()
                .map(|(n, values)| Column::new(n, values))
                .collect(),
        );
        Self::new(name, batch)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }
}

struct MemoryReader {
    data: Arc<RowBatch>,
    columns: Option<Vec<usize>>,
    position: usize,
    end: usize,
    chunk_rows: usize,
}

impl BatchReader for MemoryReader {
    fn next_batch(&mut self) -> CoreResult<Option<RowBatch>> {
        if self.position >= self.end {
            return Ok(None);
        }
        let len = self.chunk_rows.min(self.end - self.position);
        let mut chunk = RowBatch::new(match &self.columns {
            Some(idx) => idx.iter().map(|i| self.data.columns[*i].clone()).collect(),
            None => self.data.columns.clone(),
        });
        // Slice after cloning only the needed columns.
        chunk = chunk.slice(self.position, len);
        self.position += len;
        Ok(Some(chunk))
    }
}

impl DataSource for MemorySource {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    fn row_count_hint(&self) -> Option<usize> {
        Some(self.data.num_rows())
    }

    fn scan(&self, request: &ScanRequest) -> CoreResult<Box<dyn BatchReader>> {
        let columns = match &request.projection {
            Some(names) => Some(
                names
                    .iter()
                    .map(|n| {
                        self.schema.index_of(n).ok_or_else(|| {
                            lazyplan_core::Error::Source(format!(
                                "{}: unknown column '{n}'",
                                self.identity()
                            ))
                        })
                    })
                    .collect::<CoreResult<Vec<_>>>()?,
            ),
            None => None,
        };
        let rows = self.data.num_rows();
        let end = match (request.predicate.is_none(), request.limit) {
            (true, Some(limit)) => limit.min(rows),
            _ => rows,
        };
        Ok(Box::new(MemoryReader {
            data: Arc::clone(&self.data),
            columns,
            position: 0,
            end,
            chunk_rows: request.chunk_rows.max(1),
        }))
    }
}
