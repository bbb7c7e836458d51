//! Logical schema types. Pure data; no Arrow dependency here.
//!
//! Every plan node derives its output `Schema` from its inputs' schemas and its
//! own parameters, so schema inference never needs to look at data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type of an untyped `NULL` literal; unifies with every other type.
    Null,
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Types that have a total order usable by sort/min/max.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, DataType::Binary)
    }

    fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Int32 => Some(0),
            DataType::Int64 => Some(1),
            DataType::Float32 => Some(2),
            DataType::Float64 => Some(3),
            _ => None,
        }
    }

    /// Result type of arithmetic between two numeric types
    /// (`Int32 < Int64 < Float32 < Float64`).
    ///
    /// Evaluation kernels use the same function, so a statically inferred type
    /// always matches the runtime value's type.
    pub fn promote_numeric(a: DataType, b: DataType) -> Option<DataType> {
        let (ra, rb) = (a.numeric_rank()?, b.numeric_rank()?);
        Some(if ra >= rb { a } else { b })
    }

    /// Common type of two values that must be comparable or coalesced.
    pub fn unify(a: DataType, b: DataType) -> Option<DataType> {
        match (a, b) {
            (DataType::Null, other) | (other, DataType::Null) => Some(other),
            (x, y) if x == y => Some(x),
            (x, y) => DataType::promote_numeric(x, y),
        }
    }

    /// Rough per-value width used by the cost model.
    pub fn estimated_width(&self) -> u64 {
        match self {
            DataType::Null => 1,
            DataType::Boolean => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
            DataType::Utf8 => 32,
            DataType::Binary => 64,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Null => "Null",
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Utf8 => "Utf8",
            DataType::Binary => "Binary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Like `field_by_name`, but reports an unknown column as a schema error.
    pub fn require(&self, name: &str) -> Result<&Field> {
        self.field_by_name(name).ok_or_else(|| {
            Error::Schema(format!(
                "unknown column '{name}'; available columns: [{}]",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Sub-schema with the given columns, in the given order.
    pub fn project(&self, names: &[String]) -> Result<Schema> {
        let fields = names
            .iter()
            .map(|n| self.require(n).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }

    /// Same column names and types in the same order (nullability ignored).
    pub fn same_shape(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .map(|(a, b)| a.name == b.name && a.data_type == b.data_type)
                .all(|eq| eq)
    }

    /// Fails when a column name appears more than once.
    pub fn check_unique_names(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::Schema(format!("duplicate column name '{}'", f.name)));
            }
        }
        Ok(())
    }

    /// Estimated bytes per row, for chunk sizing.
    pub fn estimated_row_width(&self) -> u64 {
        self.fields
            .iter()
            .map(|f| f.data_type.estimated_width())
            .sum::<u64>()
            .max(1)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.data_type)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_follows_numeric_rank() {
        assert_eq!(
            DataType::promote_numeric(DataType::Int32, DataType::Int64),
            Some(DataType::Int64)
        );
        assert_eq!(
            DataType::promote_numeric(DataType::Float64, DataType::Int32),
            Some(DataType::Float64)
        );
        assert_eq!(DataType::promote_numeric(DataType::Utf8, DataType::Int32), None);
        assert_eq!(
            DataType::unify(DataType::Null, DataType::Utf8),
            Some(DataType::Utf8)
        );
    }

    #[test]
    fn project_reports_unknown_columns() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]);
        let p = schema.project(&["b".to_string()]).unwrap();
        assert_eq!(p.names(), vec!["b".to_string()]);
        let err = schema.project(&["zz".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
