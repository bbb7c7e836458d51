//! Build-side hash table for `HashJoin`.

use std::collections::HashMap;

use lazyplan_core::kernels;
use lazyplan_core::plan::JoinType;
use lazyplan_core::schema::DataType;
use lazyplan_core::types::{Column, RowBatch, Scalar};
use lazyplan_mem::guard::BudgetGuardImpl;

use super::HashJoin;
use crate::traits::{ExecContext, OpError};

/// Right-side rows indexed by encoded key. Row ids are global across all
/// inserted batches, in insertion order.
pub struct JoinTable {
    batches: Vec<RowBatch>,
    /// (batch, row) per global row id.
    locations: Vec<(usize, usize)>,
    index: HashMap<Vec<u8>, Vec<usize>>,
    right_on: Vec<String>,
    key_types: Vec<DataType>,
    guard: BudgetGuardImpl,
}

impl JoinTable {
    pub fn new(op: &HashJoin, ctx: &ExecContext) -> Result<Self, OpError> {
        Ok(Self {
            batches: Vec::new(),
            locations: Vec::new(),
            index: HashMap::new(),
            right_on: op.right_on.clone(),
            key_types: op.key_types.clone(),
            guard: ctx.reserve(0, "join_build")?,
        })
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn insert(&mut self, batch: RowBatch) -> Result<(), OpError> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let key_idx = batch.key_indices(&self.right_on).map_err(OpError::Exec)?;
        self.guard
            .grow(batch.approx_bytes() + batch.num_rows() * 24)?;
        let b = self.batches.len();
        for row in 0..batch.num_rows() {
            if let Some(key) = encode_key(&batch, row, &key_idx, &self.key_types)? {
                let id = self.locations.len();
                self.locations.push((b, row));
                self.index.entry(key).or_default().push(id);
            }
        }
        self.batches.push(batch);
        Ok(())
    }

    /// Join one left batch against the table.
    pub fn probe(&self, op: &HashJoin, left: &RowBatch) -> Result<RowBatch, OpError> {
        let key_idx = left.key_indices(&op.left_on).map_err(OpError::Exec)?;
        let mut left_rows = Vec::new();
        let mut right_rows: Vec<Option<usize>> = Vec::new();
        for row in 0..left.num_rows() {
            let matches = match encode_key(left, row, &key_idx, &self.key_types)? {
                Some(key) => self.index.get(&key).map(Vec::as_slice).unwrap_or(&[]),
                None => &[],
            };
            match op.how {
                JoinType::Semi => {
                    if !matches.is_empty() {
                        left_rows.push(row);
                    }
                }
                JoinType::Anti => {
                    if matches.is_empty() {
                        left_rows.push(row);
                    }
                }
                JoinType::Inner | JoinType::Left => {
                    for &id in matches {
                        left_rows.push(row);
                        right_rows.push(Some(id));
                    }
                    if matches.is_empty() && op.how == JoinType::Left {
                        left_rows.push(row);
                        right_rows.push(None);
                    }
                }
            }
        }

        let left_part = left.take(&left_rows).with_names(&op.schema);
        if matches!(op.how, JoinType::Semi | JoinType::Anti) {
            return Ok(left_part);
        }
        let right_part = self.gather_right(op, &right_rows, left.num_columns());
        RowBatch::hstack(left_part, right_part).map_err(OpError::Exec)
    }

    /// Non-key right columns for the matched ids, named per the output schema.
    fn gather_right(&self, op: &HashJoin, ids: &[Option<usize>], left_width: usize) -> RowBatch {
        let Some(template) = self.batches.first() else {
            // Empty build side: every right column is null.
            let columns = op.schema.fields[left_width..]
                .iter()
                .map(|f| Column::new(f.name.clone(), vec![Scalar::Null; ids.len()]))
                .collect();
            return RowBatch::new(columns);
        };
        let positions: Vec<usize> = template
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.right_on.contains(&c.name))
            .map(|(i, _)| i)
            .collect();
        let columns = positions
            .iter()
            .zip(op.schema.fields[left_width..].iter())
            .map(|(&pos, field)| {
                let values = ids
                    .iter()
                    .map(|id| match id {
                        Some(id) => {
                            let (b, r) = self.locations[*id];
                            self.batches[b].columns[pos].values[r].clone()
                        }
                        None => Scalar::Null,
                    })
                    .collect();
                Column::new(field.name.clone(), values)
            })
            .collect();
        RowBatch::new(columns)
    }
}

/// Canonical key bytes, or `None` when any key value is null.
fn encode_key(
    batch: &RowBatch,
    row: usize,
    key_idx: &[usize],
    key_types: &[DataType],
) -> Result<Option<Vec<u8>>, OpError> {
    let mut out = Vec::with_capacity(key_idx.len() * 9);
    for (&c, &ty) in key_idx.iter().zip(key_types.iter()) {
        let v = &batch.columns[c].values[row];
        if v.is_null() {
            return Ok(None);
        }
        if ty.is_float() && !v.data_type().is_float() {
            kernels::cast(v, ty)?.key_bytes(&mut out);
        } else {
            v.key_bytes(&mut out);
        }
    }
    Ok(Some(out))
}
