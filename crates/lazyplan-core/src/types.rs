//! Lightweight row-batch representation (the engine's ExecutionBatch).
//!
//! Columns hold `Scalar` values; a `RowBatch` is a chunk of equally long named
//! columns. Batches are moved from producer to consumer; operators that need
//! to keep data around clone or account for it explicitly.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::SortKey;
use crate::schema::{DataType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I32(_) => DataType::Int32,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F32(_) => DataType::Float32,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I32(v) => Some(*v as i64),
            Scalar::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Approximate heap + inline footprint, for memory accounting.
    pub fn approx_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Scalar>();
        match self {
            Scalar::Str(s) => inline + s.len(),
            Scalar::Bin(b) => inline + b.len(),
            _ => inline,
        }
    }

    /// Append the canonical hash-key encoding of this value (see `RowBatch::row_key`).
    pub fn key_bytes(&self, out: &mut Vec<u8>) {
        encode_key_scalar(self, out)
    }

    /// Total order used by sorting: nulls first, NaN after all other floats,
    /// numbers compared across integer/float widths.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        scalar_cmp(self, other)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::Str(s) => write!(f, "\"{s}\""),
            Scalar::Bin(b) => write!(f, "{b:?}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::I32(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::I64(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::F32(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::F64(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A chunk of rows with a fixed set of named columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Column>,
}

impl RowBatch {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Zero-row batch carrying the column names of `schema`.
    pub fn empty(schema: &Schema) -> Self {
        Self {
            columns: schema
                .fields
                .iter()
                .map(|f| Column::new(f.name.clone(), Vec::new()))
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Approximate in-memory size, used for budget reservations.
    pub fn approx_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.name.len() + c.values.iter().map(Scalar::approx_bytes).sum::<usize>())
            .sum()
    }

    /// Row-major copy of the data. Mostly for tests and result inspection.
    pub fn rows(&self) -> Vec<Vec<Scalar>> {
        (0..self.num_rows())
            .map(|r| self.columns.iter().map(|c| c.values[r].clone()).collect())
            .collect()
    }

    /// Rows `[offset, offset + len)`, clamped to the batch.
    pub fn slice(&self, offset: usize, len: usize) -> RowBatch {
        let n = self.num_rows();
        let start = offset.min(n);
        let end = start.saturating_add(len).min(n);
        RowBatch {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values[start..end].to_vec()))
                .collect(),
        }
    }

    /// Gather rows by index (indices may repeat).
    pub fn take(&self, indices: &[usize]) -> RowBatch {
        RowBatch {
            columns: self
                .columns
                .iter()
                .map(|c| {
                    Column::new(
                        c.name.clone(),
                        indices.iter().map(|&i| c.values[i].clone()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Keep rows where `mask` is true. Consumes the batch to avoid a copy of
    /// the surviving values.
    pub fn filter(self, mask: &[bool]) -> RowBatch {
        RowBatch {
            columns: self
                .columns
                .into_iter()
                .map(|c| {
                    let values = c
                        .values
                        .into_iter()
                        .zip(mask.iter())
                        .filter_map(|(v, keep)| keep.then_some(v))
                        .collect();
                    Column::new(c.name, values)
                })
                .collect(),
        }
    }

    /// Select columns by name, in the given order.
    pub fn project(&self, names: &[String]) -> Result<RowBatch, String> {
        let columns = names
            .iter()
            .map(|n| {
                self.column(n)
                    .cloned()
                    .ok_or_else(|| format!("column '{n}' not found in batch"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowBatch { columns })
    }

    /// Rename columns positionally to match `schema`.
    pub fn with_names(mut self, schema: &Schema) -> RowBatch {
        for (col, field) in self.columns.iter_mut().zip(schema.fields.iter()) {
            if col.name != field.name {
                col.name = field.name.clone();
            }
        }
        self
    }

    /// Append rows of several batches with identical column names.
    pub fn concat_rows(batches: Vec<RowBatch>) -> Result<RowBatch, String> {
        let mut iter = batches.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(RowBatch::default());
        };
        for batch in iter {
            if batch.columns.len() != out.columns.len() {
                return Err(format!(
                    "cannot concat batches with {} and {} columns",
                    out.columns.len(),
                    batch.columns.len()
                ));
            }
            for (dst, src) in out.columns.iter_mut().zip(batch.columns.into_iter()) {
                if dst.name != src.name {
                    return Err(format!(
                        "cannot concat column '{}' with column '{}'",
                        dst.name, src.name
                    ));
                }
                dst.values.extend(src.values);
            }
        }
        Ok(out)
    }

    /// Place `right`'s columns after `left`'s (join output assembly).
    pub fn hstack(left: RowBatch, right: RowBatch) -> Result<RowBatch, String> {
        if !left.columns.is_empty()
            && !right.columns.is_empty()
            && left.num_rows() != right.num_rows()
        {
            return Err(format!(
                "cannot hstack batches with different row counts: {} vs {}",
                left.num_rows(),
                right.num_rows()
            ));
        }
        let mut columns = left.columns;
        columns.extend(right.columns);
        Ok(RowBatch { columns })
    }

    /// Stable sort permutation for the given keys.
    pub fn sort_indices(&self, keys: &[SortKey]) -> Result<Vec<usize>, String> {
        let key_indices: Vec<usize> = keys
            .iter()
            .map(|key| {
                self.column_index(&key.column)
                    .ok_or_else(|| format!("sort key column '{}' not found", key.column))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut indices: Vec<usize> = (0..self.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            for (key, &col_idx) in keys.iter().zip(key_indices.iter()) {
                let va = &self.columns[col_idx].values[a];
                let vb = &self.columns[col_idx].values[b];
                let ord = compare_for_sort(va, vb, key.descending, key.nulls_last);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(indices)
    }

    /// Sort rows by the given keys (stable).
    pub fn sort_by_keys(&self, keys: &[SortKey]) -> Result<RowBatch, String> {
        if self.num_rows() <= 1 {
            return Ok(self.clone());
        }
        let indices = self.sort_indices(keys)?;
        Ok(self.take(&indices))
    }

    /// Compute a hash partition index for each row based on specified columns.
    pub fn hash_columns(
        &self,
        hash_keys: &[String],
        num_partitions: usize,
    ) -> Result<Vec<usize>, String> {
        let key_indices = self.key_indices(hash_keys)?;
        let partitions = num_partitions.max(1);
        let mut result = Vec::with_capacity(self.num_rows());
        for row_idx in 0..self.num_rows() {
            let key = self.row_key(row_idx, &key_indices);
            let hash = blake3::hash(&key);
            let mut word = [0u8; 8];
            word.copy_from_slice(&hash.as_bytes()[0..8]);
            result.push((u64::from_le_bytes(word) as usize) % partitions);
        }
        Ok(result)
    }

    /// Resolve key column names to positions.
    pub fn key_indices(&self, keys: &[String]) -> Result<Vec<usize>, String> {
        keys.iter()
            .map(|key| {
                self.column_index(key)
                    .ok_or_else(|| format!("key column '{key}' not found"))
            })
            .collect()
    }

    /// Canonical byte encoding of a row's key columns, usable as a hash-map key.
    ///
    /// Integers of either width encode identically, as do floats; `-0.0` and
    /// `0.0` collapse, and every NaN encodes the same.
    pub fn row_key(&self, row_idx: usize, key_indices: &[usize]) -> Vec<u8> {
        let mut out = Vec::with_capacity(key_indices.len() * 9);
        for &col_idx in key_indices {
            encode_key_scalar(&self.columns[col_idx].values[row_idx], &mut out);
        }
        out
    }
}

impl fmt::Display for RowBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.column_names().join(" | "))?;
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

fn compare_for_sort(a: &Scalar, b: &Scalar, descending: bool, nulls_last: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if nulls_last {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if nulls_last {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {
            let ord = scalar_cmp(a, b);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

/// Compare two scalars for sorting.
///
/// Nulls are sorted first, then values are compared by type.
fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(_) | I64(_), I32(_) | I64(_)) => a.as_i64().cmp(&b.as_i64()),
        (I32(_) | I64(_) | F32(_) | F64(_), I32(_) | I64(_) | F32(_) | F64(_)) => {
            float_cmp(a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0))
        }
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        // Mixed types: order by variant order
        _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) => 2,
        I64(_) => 3,
        F32(_) => 4,
        F64(_) => 5,
        Str(_) => 6,
        Bin(_) => 7,
    }
}

fn encode_key_scalar(scalar: &Scalar, out: &mut Vec<u8>) {
    use Scalar::*;
    match scalar {
        Null => out.push(0),
        Bool(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        I32(_) | I64(_) => {
            out.push(2);
            out.extend_from_slice(&scalar.as_i64().unwrap_or(0).to_le_bytes());
        }
        F32(_) | F64(_) => {
            out.push(3);
            let v = scalar.as_f64().unwrap_or(0.0);
            let canonical = if v.is_nan() {
                f64::NAN.to_bits()
            } else if v == 0.0 {
                0u64
            } else {
                v.to_bits()
            };
            out.extend_from_slice(&canonical.to_le_bytes());
        }
        Str(s) => {
            out.push(4);
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Bin(b) => {
            out.push(5);
            out.extend_from_slice(&(b.len() as u64).to_le_bytes());
            out.extend_from_slice(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "k",
                vec![
                    Scalar::Str("b".into()),
                    Scalar::Null,
                    Scalar::Str("a".into()),
                    Scalar::Str("b".into()),
                ],
            ),
            Column::new(
                "v",
                vec![Scalar::I64(1), Scalar::I64(2), Scalar::I64(3), Scalar::I64(4)],
            ),
        ])
    }

    #[test]
    fn sort_is_stable_and_honours_null_placement() {
        let b = batch();
        let asc = b.sort_by_keys(&[SortKey::asc("k")]).unwrap();
        assert_eq!(
            asc.column("v").unwrap().values,
            vec![Scalar::I64(2), Scalar::I64(3), Scalar::I64(1), Scalar::I64(4)]
        );
        let desc_nulls_last = b
            .sort_by_keys(&[SortKey {
                column: "k".into(),
                descending: true,
                nulls_last: true,
            }])
            .unwrap();
        assert_eq!(
            desc_nulls_last.column("v").unwrap().values,
            vec![Scalar::I64(1), Scalar::I64(4), Scalar::I64(3), Scalar::I64(2)]
        );
    }

    #[test]
    fn row_keys_ignore_integer_width() {
        let b = RowBatch::new(vec![
            Column::new("a", vec![Scalar::I32(7)]),
            Column::new("b", vec![Scalar::I64(7)]),
        ]);
        assert_eq!(b.row_key(0, &[0]), b.row_key(0, &[1]));
    }

    #[test]
    fn slice_filter_and_concat() {
        let b = batch();
        assert_eq!(b.slice(1, 2).num_rows(), 2);
        assert_eq!(b.slice(3, 10).num_rows(), 1);
        assert_eq!(b.slice(10, 1).num_rows(), 0);

        let kept = b.clone().filter(&[true, false, false, true]);
        assert_eq!(kept.column("v").unwrap().values, vec![Scalar::I64(1), Scalar::I64(4)]);

        let joined = RowBatch::concat_rows(vec![kept.clone(), kept]).unwrap();
        assert_eq!(joined.num_rows(), 4);

        let mismatched = RowBatch::new(vec![Column::new("x", vec![])]);
        assert!(RowBatch::concat_rows(vec![b, mismatched]).is_err());
    }

    #[test]
    fn hash_partitions_are_in_range_and_key_consistent() {
        let b = batch();
        let parts = b.hash_columns(&["k".to_string()], 3).unwrap();
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| *p < 3));
        assert_eq!(parts[0], parts[3]);
    }
}
