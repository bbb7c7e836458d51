//! CSV source with a declared schema.
//!
//! The file must have a header row. Only the requested columns are decoded;
//! empty fields decode to null. Predicates and limits are not pushed into the
//! reader.

use std::fs::File;
use std::path::{Path, PathBuf};

use lazyplan_core::error::Result as CoreResult;
use lazyplan_core::kernels;
use lazyplan_core::schema::{DataType, Schema};
use lazyplan_core::source::{BatchReader, DataSource, ScanRequest};
use lazyplan_core::types::{Column, RowBatch, Scalar};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    schema: Schema,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        schema.check_unique_names()?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            schema,
            delimiter: b',',
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self, request: &ScanRequest) -> Result<CsvReader> {
        let file = File::open(&self.path)?;
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(file);
        let headers = reader.headers()?.clone();

        let wanted: Vec<String> = match &request.projection {
            Some(cols) => cols.clone(),
            None => self.schema.names(),
        };
        let mut columns = Vec::with_capacity(wanted.len());
        for name in wanted {
            let field = self.schema.require(&name)?;
            let position = headers.iter().position(|h| h == name).ok_or_else(|| {
                Error::Schema(format!(
                    "{}: header has no column '{name}'",
                    self.path.display()
                ))
            })?;
            columns.push(CsvColumn {
                name,
                position,
                dtype: field.data_type,
            });
        }

        Ok(CsvReader {
            records: reader.into_records(),
            columns,
            chunk_rows: request.chunk_rows.max(1),
            row: 0,
            done: false,
        })
    }
}

struct CsvColumn {
    name: String,
    position: usize,
    dtype: DataType,
}

struct CsvReader {
    records: ::csv::StringRecordsIntoIter<File>,
    columns: Vec<CsvColumn>,
    chunk_rows: usize,
    row: usize,
    done: bool,
}

impl CsvReader {
    fn read_chunk(&mut self) -> Result<Option<RowBatch>> {
        if self.done {
            return Ok(None);
        }
        let mut values: Vec<Vec<Scalar>> = self
            .columns
            .iter()
            .map(|_| Vec::with_capacity(self.chunk_rows))
            .collect();
        let mut taken = 0;
        while taken < self.chunk_rows {
            let Some(record) = self.records.next() else {
                self.done = true;
                break;
            };
            let record = record?;
            for (col, out) in self.columns.iter().zip(values.iter_mut()) {
                let raw = record.get(col.position).unwrap_or("");
                out.push(decode(raw, col.dtype).map_err(|message| Error::Parse {
                    column: col.name.clone(),
                    row: self.row,
                    message,
                })?);
            }
            self.row += 1;
            taken += 1;
        }
        if taken == 0 {
            return Ok(None);
        }
        Ok(Some(RowBatch::new(
            self.columns
                .iter()
                .zip(values)
                .map(|(c, v)| Column::new(c.name.clone(), v))
                .collect(),
        )))
    }
}

fn decode(raw: &str, dtype: DataType) -> std::result::Result<Scalar, String> {
    if raw.is_empty() {
        return Ok(Scalar::Null);
    }
    kernels::cast(&Scalar::Str(raw.to_string()), dtype).map_err(|e| e.to_string())
}

impl BatchReader for CsvReader {
    fn next_batch(&mut self) -> CoreResult<Option<RowBatch>> {
        Ok(self.read_chunk()?)
    }
}

impl DataSource for CsvSource {
    fn identity(&self) -> String {
        format!("csv://{}", self.path.display())
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    fn scan(&self, request: &ScanRequest) -> CoreResult<Box<dyn BatchReader>> {
        tracing::debug!(path = %self.path.display(), projection = ?request.projection, "opening csv scan");
        Ok(Box::new(self.open(request)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::schema::Field;
    use std::io::Write;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("city", DataType::Utf8, true),
            Field::new("temp", DataType::Float64, true),
        ])
    }

    #[test]
    fn reads_typed_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,city,temp").unwrap();
        writeln!(file, "1,Oslo,3.5").unwrap();
        writeln!(file, "2,,").unwrap();
        writeln!(file, "3,Lima,18").unwrap();
        file.flush().unwrap();

        let src = CsvSource::new(file.path(), schema()).unwrap();
        let mut req = ScanRequest::full(2);
        req.projection = Some(vec!["temp".into(), "id".into()]);
        let mut reader = src.scan(&req).unwrap();
        let first = reader.next_batch().unwrap().unwrap();
        assert_eq!(first.column_names(), vec!["temp", "id"]);
        assert_eq!(first.num_rows(), 2);
        assert_eq!(first.columns[0].values[1], Scalar::Null);
        let second = reader.next_batch().unwrap().unwrap();
        assert_eq!(second.columns[0].values[0], Scalar::F64(18.0));
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn bad_values_name_the_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,city,temp").unwrap();
        writeln!(file, "x,Oslo,1").unwrap();
        file.flush().unwrap();

        let src = CsvSource::new(file.path(), schema()).unwrap();
        let err = src.materialize(&ScanRequest::full(10)).unwrap_err();
        assert!(err.to_string().contains("'id'"));
    }
}
