//! Hash aggregation.
//!
//! Groups rows by the canonical key bytes of the key columns and folds one
//! accumulator per aggregation expression. In batch mode without
//! `maintain_order` the input is hash-partitioned and the partitions are
//! aggregated in parallel; output order then follows partition order. With
//! `maintain_order` (and always under streaming) a single table yields groups
//! in first-seen order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use lazyplan_core::expr::{AggFunc, BinaryOp, Expr};
use lazyplan_core::kernels;
use lazyplan_core::prelude::Schema;
use lazyplan_core::schema::DataType;
use lazyplan_core::types::{Column, RowBatch, Scalar};
use lazyplan_mem::guard::BudgetGuardImpl;

use crate::eval::{conform, evaluate};
use crate::plan::{Footprint, StreamingSupport};
use crate::stream::{BatchQueue, BatchStream};
use crate::traits::{single_input, single_stream, ExecContext, OpError, Operator};

/// Approximate per-accumulator state, on top of the key bytes.
const ACC_BYTES: usize = 48;

#[derive(Debug)]
pub struct Aggregate {
    pub keys: Vec<String>,
    /// `Agg` expressions, optionally aliased.
    pub aggs: Vec<Expr>,
    pub maintain_order: bool,
    pub schema: Schema,
}

/// One aggregation, split into its function, row-wise input and result type.
#[derive(Debug, Clone)]
struct AggSpec {
    func: AggFunc,
    input: Option<Expr>,
    output: DataType,
}

impl Aggregate {
    fn specs(&self) -> Result<Vec<AggSpec>, OpError> {
        self.aggs
            .iter()
            .enumerate()
            .map(|(i, e)| match e.unaliased() {
                Expr::Agg { func, input } => Ok(AggSpec {
                    func: *func,
                    input: input.as_deref().cloned(),
                    output: self
                        .schema
                        .field(self.keys.len() + i)
                        .map(|f| f.data_type)
                        .unwrap_or(DataType::Null),
                }),
                other => Err(OpError::Plan(format!("{other} is not an aggregation"))),
            })
            .collect()
    }

    fn new_table(&self, ctx: &ExecContext) -> Result<GroupTable, OpError> {
        Ok(GroupTable {
            specs: self.specs()?,
            key_names: self.keys.clone(),
            index: HashMap::new(),
            groups: Vec::new(),
            guard: ctx.reserve(0, "aggregate")?,
        })
    }

    fn aggregate_all(&self, input: &RowBatch, ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let mut table = self.new_table(ctx)?;
        table.update(input)?;
        table.finish(&self.schema)
    }
}

impl Operator for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn memory_need(&self, rows: u64, _bytes: u64) -> Footprint {
        Footprint {
            bytes_per_row: (ACC_BYTES * self.aggs.len().max(1)) as u64,
            overhead_bytes: rows.min(1024).saturating_mul(16),
        }
    }

    fn streaming_support(&self) -> StreamingSupport {
        StreamingSupport::Blocking
    }

    fn eval_batch(&self, inputs: &[Arc<RowBatch>], ctx: &ExecContext) -> Result<RowBatch, OpError> {
        let input = single_input(inputs, self.name())?;
        let partitions = ctx.aggregate_partitions;
        if self.maintain_order || self.keys.is_empty() || partitions <= 1 || input.num_rows() < 2 {
            return self.aggregate_all(input, ctx);
        }

        let assignment = input
            .hash_columns(&self.keys, partitions)
            .map_err(OpError::Exec)?;
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); partitions];
        for (row, p) in assignment.into_iter().enumerate() {
            buckets[p].push(row);
        }
        let parts = buckets
            .into_par_iter()
            .filter(|rows| !rows.is_empty())
            .map(|rows| self.aggregate_all(&input.take(&rows), ctx))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(partitions = parts.len(), "partitioned aggregation");
        if parts.is_empty() {
            return Ok(RowBatch::empty(&self.schema));
        }
        RowBatch::concat_rows(parts).map_err(OpError::Exec)
    }

    fn open_stream(
        &self,
        inputs: Vec<Box<dyn BatchStream>>,
        ctx: &ExecContext,
    ) -> Result<Box<dyn BatchStream>, OpError> {
        Ok(Box::new(AggregateStream {
            input: Some(single_stream(inputs, self.name())?),
            table: Some(self.new_table(ctx)?),
            schema: self.schema.clone(),
            chunk_rows: ctx.chunk_rows,
            output: BatchQueue::new(),
        }))
    }
}

struct AggregateStream {
    input: Option<Box<dyn BatchStream>>,
    table: Option<GroupTable>,
    schema: Schema,
    chunk_rows: usize,
    output: BatchQueue,
}

impl BatchStream for AggregateStream {
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, OpError> {
        if let Some(mut input) = self.input.take() {
            let mut table = self
                .table
                .take()
                .ok_or_else(|| OpError::Exec("aggregate state already consumed".into()))?;
            while let Some(batch) = input.next_batch(self.chunk_rows)? {
                table.update(&batch)?;
            }
            self.output.push(table.finish(&self.schema)?);
        }
        Ok(self.output.pop(max_rows))
    }
}

struct Group {
    key: Vec<Scalar>,
    accs: Vec<Accumulator>,
}

/// Groups in first-seen order plus the key-bytes index into them.
struct GroupTable {
    specs: Vec<AggSpec>,
    key_names: Vec<String>,
    index: HashMap<Vec<u8>, usize>,
    groups: Vec<Group>,
    guard: BudgetGuardImpl,
}

impl GroupTable {
    fn update(&mut self, batch: &RowBatch) -> Result<(), OpError> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let key_idx = batch.key_indices(&self.key_names).map_err(OpError::Exec)?;
        let inputs = self
            .specs
            .iter()
            .map(|s| match &s.input {
                Some(e) => evaluate(e, batch).map(Some),
                None => Ok(None),
            })
            .collect::<Result<Vec<Option<Column>>, _>>()?;

        for row in 0..batch.num_rows() {
            let key = batch.row_key(row, &key_idx);
            let slot = match self.index.get(&key) {
                Some(&slot) => slot,
                None => {
                    let values: Vec<Scalar> = key_idx
                        .iter()
                        .map(|&c| batch.columns[c].values[row].clone())
                        .collect();
                    self.guard.grow(
                        key.len() * 2
                            + values.iter().map(Scalar::approx_bytes).sum::<usize>()
                            + ACC_BYTES * self.specs.len(),
                    )?;
                    self.groups.push(Group {
                        key: values,
                        accs: self.specs.iter().map(Accumulator::new).collect(),
                    });
                    self.index.insert(key, self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            let group = &mut self.groups[slot];
            for (acc, column) in group.accs.iter_mut().zip(inputs.iter()) {
                let value = column.as_ref().map(|c| &c.values[row]);
                let grown = acc.update(value)?;
                if grown > 0 {
                    self.guard.grow(grown)?;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self, schema: &Schema) -> Result<RowBatch, OpError> {
        // A global aggregation yields one row even over no input.
        if self.key_names.is_empty() && self.groups.is_empty() {
            self.groups.push(Group {
                key: Vec::new(),
                accs: self.specs.iter().map(Accumulator::new).collect(),
            });
        }
        let n_keys = self.key_names.len();
        let mut columns: Vec<Vec<Scalar>> =
            vec![Vec::with_capacity(self.groups.len()); n_keys + self.specs.len()];
        for group in self.groups {
            for (i, v) in group.key.into_iter().enumerate() {
                columns[i].push(v);
            }
            for (i, (acc, spec)) in group.accs.into_iter().zip(self.specs.iter()).enumerate() {
                columns[n_keys + i].push(acc.finish(spec.output)?);
            }
        }
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, values)| {
                let name = schema.field(i).map(|f| f.name.clone()).unwrap_or_default();
                conform(Column::new(name, values), schema, i)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowBatch::new(columns))
    }
}

enum Accumulator {
    Count(i64),
    CountRows(i64),
    Sum(Scalar),
    Mean { total: f64, n: u64 },
    Min(Option<Scalar>),
    Max(Option<Scalar>),
    First(Option<Scalar>),
    Last(Option<Scalar>),
    NUnique(HashSet<Vec<u8>>),
}

impl Accumulator {
    fn new(spec: &AggSpec) -> Self {
        match spec.func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::CountRows => Accumulator::CountRows(0),
            AggFunc::Sum => Accumulator::Sum(match spec.output {
                DataType::Float64 | DataType::Float32 => Scalar::F64(0.0),
                _ => Scalar::I64(0),
            }),
            AggFunc::Mean => Accumulator::Mean { total: 0.0, n: 0 },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
            AggFunc::First => Accumulator::First(None),
            AggFunc::Last => Accumulator::Last(None),
            AggFunc::NUnique => Accumulator::NUnique(HashSet::new()),
        }
    }

    /// Fold one value in. Returns bytes of newly retained state.
    fn update(&mut self, value: Option<&Scalar>) -> Result<usize, OpError> {
        let value = value.unwrap_or(&Scalar::Null);
        match self {
            Accumulator::CountRows(n) => *n += 1,
            Accumulator::Count(n) => {
                if !value.is_null() {
                    *n += 1;
                }
            }
            Accumulator::Sum(total) => {
                if !value.is_null() {
                    *total = kernels::binary(BinaryOp::Add, total, value)?;
                }
            }
            Accumulator::Mean { total, n } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *n += 1;
                }
            }
            Accumulator::Min(current) => {
                if !value.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| value.total_cmp(c) == std::cmp::Ordering::Less)
                {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                if !value.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| value.total_cmp(c) == std::cmp::Ordering::Greater)
                {
                    *current = Some(value.clone());
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value.clone());
                    return Ok(value.approx_bytes());
                }
            }
            Accumulator::Last(current) => *current = Some(value.clone()),
            Accumulator::NUnique(seen) => {
                let mut key = Vec::new();
                value.key_bytes(&mut key);
                let len = key.len();
                if seen.insert(key) {
                    return Ok(len + 16);
                }
            }
        }
        Ok(0)
    }

    fn finish(self, output: DataType) -> Result<Scalar, OpError> {
        Ok(match self {
            Accumulator::Count(n) | Accumulator::CountRows(n) => Scalar::I64(n),
            Accumulator::Sum(total) => kernels::cast(&total, output)?,
            Accumulator::Mean { total, n } => {
                if n == 0 {
                    Scalar::Null
                } else {
                    Scalar::F64(total / n as f64)
                }
            }
            Accumulator::Min(v)
            | Accumulator::Max(v)
            | Accumulator::First(v)
            | Accumulator::Last(v) => v.unwrap_or(Scalar::Null),
            Accumulator::NUnique(seen) => Scalar::I64(seen.len() as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{drain, MemoryStream};
    use lazyplan_core::expr::{col, count_rows};
    use lazyplan_core::schema::Field;
    use lazyplan_mem::MemoryBudgetImpl;

    fn sales() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "region",
                ["n", "s", "n", "e", "s", "n"]
                    .iter()
                    .map(|s| Scalar::Str(s.to_string()))
                    .collect(),
            ),
            Column::new(
                "amount",
                vec![
                    Scalar::I64(10),
                    Scalar::I64(5),
                    Scalar::Null,
                    Scalar::I64(7),
                    Scalar::I64(1),
                    Scalar::I64(3),
                ],
            ),
        ])
    }

    fn op(keys: &[&str], maintain_order: bool) -> Aggregate {
        let mut fields: Vec<Field> = keys
            .iter()
            .map(|k| Field::new(*k, DataType::Utf8, false))
            .collect();
        fields.push(Field::new("total", DataType::Int64, true));
        fields.push(Field::new("avg", DataType::Float64, true));
        fields.push(Field::new("count", DataType::Int64, false));
        Aggregate {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            aggs: vec![
                col("amount").sum().alias("total"),
                col("amount").mean().alias("avg"),
                count_rows(),
            ],
            maintain_order,
            schema: Schema::new(fields),
        }
    }

    fn ctx(partitions: usize) -> ExecContext {
        ExecContext::new(MemoryBudgetImpl::new(1 << 20), 2, partitions)
    }

    #[test]
    fn maintain_order_keeps_first_seen_groups() {
        let out = op(&["region"], true)
            .eval_batch(&[Arc::new(sales())], &ctx(4))
            .unwrap();
        assert_eq!(
            out.rows(),
            vec![
                vec![Scalar::Str("n".into()), Scalar::I64(13), Scalar::F64(6.5), Scalar::I64(3)],
                vec![Scalar::Str("s".into()), Scalar::I64(6), Scalar::F64(3.0), Scalar::I64(2)],
                vec![Scalar::Str("e".into()), Scalar::I64(7), Scalar::F64(7.0), Scalar::I64(1)],
            ]
        );
    }

    #[test]
    fn partitioned_result_matches_as_a_set() {
        let mut ordered = op(&["region"], true)
            .eval_batch(&[Arc::new(sales())], &ctx(1))
            .unwrap()
            .rows();
        let mut parallel = op(&["region"], false)
            .eval_batch(&[Arc::new(sales())], &ctx(8))
            .unwrap()
            .rows();
        ordered.sort_by(|a, b| a[0].total_cmp(&b[0]));
        parallel.sort_by(|a, b| a[0].total_cmp(&b[0]));
        assert_eq!(ordered, parallel);
    }

    #[test]
    fn global_aggregation_over_empty_input_yields_one_row() {
        let empty = RowBatch::new(vec![
            Column::new("region", vec![]),
            Column::new("amount", vec![]),
        ]);
        let out = op(&[], false).eval_batch(&[Arc::new(empty)], &ctx(4)).unwrap();
        assert_eq!(
            out.rows(),
            vec![vec![Scalar::I64(0), Scalar::Null, Scalar::I64(0)]]
        );
    }

    #[test]
    fn streaming_form_matches_ordered_batch_form() {
        let agg = op(&["region"], true);
        let batch = agg.eval_batch(&[Arc::new(sales())], &ctx(1)).unwrap();
        let input: Box<dyn BatchStream> = Box::new(MemoryStream::new(sales()));
        let mut stream = agg.open_stream(vec![input], &ctx(1)).unwrap();
        let streamed = RowBatch::concat_rows(drain(stream.as_mut(), 2).unwrap()).unwrap();
        assert_eq!(batch, streamed);
    }

    #[test]
    fn group_state_is_budgeted() {
        let tiny = ExecContext::new(MemoryBudgetImpl::new(16), 2, 1);
        let err = op(&["region"], true)
            .eval_batch(&[Arc::new(sales())], &tiny)
            .unwrap_err();
        assert!(matches!(err, OpError::ResourceExhausted { .. }));
    }
}
