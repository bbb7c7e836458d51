//! Row-wise expression evaluator.
//!
//! Stateless per batch: every call evaluates one expression over one
//! `RowBatch`, column at a time, using the scalar kernels from core.

use lazyplan_core::expr::Expr;
use lazyplan_core::kernels;
use lazyplan_core::schema::Schema;
use lazyplan_core::types::{Column, RowBatch, Scalar};

use crate::traits::OpError;

/// Evaluate `expr` to a column named after `expr.output_name()`.
pub fn evaluate(expr: &Expr, batch: &RowBatch) -> Result<Column, OpError> {
    Ok(Column::new(expr.output_name(), eval_values(expr, batch)?))
}

/// Evaluate a boolean predicate to a keep-mask; null counts as false.
pub fn evaluate_predicate(expr: &Expr, batch: &RowBatch) -> Result<Vec<bool>, OpError> {
    let values = eval_values(expr, batch)?;
    values
        .iter()
        .map(|v| match v {
            Scalar::Bool(b) => Ok(*b),
            Scalar::Null => Ok(false),
            other => Err(OpError::Exec(format!(
                "predicate {expr} produced a {} value",
                other.data_type()
            ))),
        })
        .collect()
}

/// Keep the rows of `batch` that satisfy `predicate`.
pub fn filter_batch(predicate: &Expr, batch: RowBatch) -> Result<RowBatch, OpError> {
    let mask = evaluate_predicate(predicate, &batch)?;
    if mask.iter().all(|k| *k) {
        return Ok(batch);
    }
    Ok(batch.filter(&mask))
}

/// Cast values whose runtime type differs from the declared output type
/// (numeric widening from `coalesce`, literal widths).
pub fn conform(mut column: Column, schema: &Schema, idx: usize) -> Result<Column, OpError> {
    let Some(field) = schema.field(idx) else {
        return Ok(column);
    };
    let target = field.data_type;
    if column
        .values
        .iter()
        .all(|v| v.is_null() || v.data_type() == target)
    {
        column.name = field.name.clone();
        return Ok(column);
    }
    let values = column
        .values
        .iter()
        .map(|v| kernels::cast(v, target))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Column::new(field.name.clone(), values))
}

fn eval_values(expr: &Expr, batch: &RowBatch) -> Result<Vec<Scalar>, OpError> {
    let n = batch.num_rows();
    match expr {
        Expr::Column(name) => batch
            .column(name)
            .map(|c| c.values.clone())
            .ok_or_else(|| OpError::Exec(format!("column '{name}' not found in batch"))),
        Expr::Literal(v) => Ok(vec![v.clone(); n]),
        Expr::Alias { expr, .. } => eval_values(expr, batch),
        Expr::Binary { left, op, right } => {
            let l = eval_values(left, batch)?;
            let r = eval_values(right, batch)?;
            l.iter()
                .zip(r.iter())
                .map(|(a, b)| kernels::binary(*op, a, b).map_err(OpError::from))
                .collect()
        }
        Expr::Unary { op, expr } => eval_values(expr, batch)?
            .iter()
            .map(|v| kernels::unary(*op, v).map_err(OpError::from))
            .collect(),
        Expr::Function { func, args } => {
            let columns = args
                .iter()
                .map(|a| eval_values(a, batch))
                .collect::<Result<Vec<_>, _>>()?;
            let mut row = Vec::with_capacity(columns.len());
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                row.clear();
                row.extend(columns.iter().map(|c| c[i].clone()));
                out.push(kernels::function(*func, &row)?);
            }
            Ok(out)
        }
        Expr::Cast { expr, to } => eval_values(expr, batch)?
            .iter()
            .map(|v| kernels::cast(v, *to).map_err(OpError::from))
            .collect(),
        Expr::Agg { .. } => Err(OpError::Plan(format!(
            "aggregation {expr} cannot be evaluated row-wise"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::expr::{col, lit};

    fn batch() -> RowBatch {
        RowBatch::new(vec![
            Column::new("a", vec![Scalar::I64(1), Scalar::Null, Scalar::I64(3)]),
            Column::new(
                "s",
                vec![
                    Scalar::Str("x".into()),
                    Scalar::Str("yy".into()),
                    Scalar::Null,
                ],
            ),
        ])
    }

    #[test]
    fn null_predicates_drop_rows() {
        let mask = evaluate_predicate(&col("a").gt(lit(1i64)), &batch()).unwrap();
        assert_eq!(mask, vec![false, false, true]);
    }

    #[test]
    fn evaluates_nested_expressions() {
        let e = (col("a") * lit(2i64) + lit(1i64)).alias("b");
        let out = evaluate(&e, &batch()).unwrap();
        assert_eq!(out.name, "b");
        assert_eq!(out.values, vec![Scalar::I64(3), Scalar::Null, Scalar::I64(7)]);

        let len = evaluate(&col("s").str_len(), &batch()).unwrap();
        assert_eq!(len.values, vec![Scalar::I64(1), Scalar::I64(2), Scalar::Null]);
    }

    #[test]
    fn missing_columns_and_bad_predicates_error() {
        assert!(evaluate(&col("zz"), &batch()).is_err());
        assert!(evaluate_predicate(&col("a"), &batch()).is_err());
        let overflow = col("a") * lit(i64::MAX);
        assert!(matches!(
            evaluate(&overflow, &batch()).unwrap_err(),
            OpError::Exec(_)
        ));
    }
}
