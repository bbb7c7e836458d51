//! Logical plan nodes.
//!
//! A `PlanNode` refers to its inputs by `NodeId` within a [`crate::arena::PlanArena`].
//! Its output schema is a pure function of the input schemas and the node's
//! own parameters, computed (and validated) by [`PlanNode::infer_schema`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::hash::{hash_node, Hash256};
use crate::id::NodeId;
use crate::schema::{DataType, Field, Schema};
use crate::source::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Semi,
    Anti,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Semi => "semi",
            JoinType::Anti => "anti",
        };
        f.write_str(s)
    }
}

/// Suffix given to a right-side join column whose name exists on the left.
pub const JOIN_SUFFIX: &str = "_right";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
    pub nulls_last: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
            nulls_last: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
            nulls_last: false,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_last = true;
        self
    }
}

impl From<&str> for SortKey {
    fn from(column: &str) -> Self {
        SortKey::asc(column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Scan {
        source: SourceRef,
        /// Output columns, in order; `None` = the full source schema.
        projection: Option<Vec<String>>,
        /// Applied before `limit`. May reference columns outside `projection`.
        predicate: Option<Expr>,
        limit: Option<usize>,
    },
    Filter {
        input: NodeId,
        predicate: Expr,
    },
    Select {
        input: NodeId,
        exprs: Vec<Expr>,
    },
    Aggregate {
        input: NodeId,
        keys: Vec<String>,
        aggs: Vec<Expr>,
        maintain_order: bool,
    },
    Join {
        left: NodeId,
        right: NodeId,
        left_on: Vec<String>,
        right_on: Vec<String>,
        how: JoinType,
    },
    Sort {
        input: NodeId,
        by: Vec<SortKey>,
        /// Keep only the first `limit` rows (top-k).
        limit: Option<usize>,
    },
    /// Negative `offset` counts from the end (`tail`).
    Slice {
        input: NodeId,
        offset: i64,
        len: usize,
    },
    Union {
        inputs: Vec<NodeId>,
    },
    Distinct {
        input: NodeId,
        /// Columns that define a duplicate; `None` = all columns.
        subset: Option<Vec<String>>,
    },
}

impl PlanNode {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanNode::Scan { .. } => "scan",
            PlanNode::Filter { .. } => "filter",
            PlanNode::Select { .. } => "select",
            PlanNode::Aggregate { .. } => "aggregate",
            PlanNode::Join { .. } => "join",
            PlanNode::Sort { .. } => "sort",
            PlanNode::Slice { .. } => "slice",
            PlanNode::Union { .. } => "union",
            PlanNode::Distinct { .. } => "distinct",
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            PlanNode::Scan { .. } => vec![],
            PlanNode::Filter { input, .. }
            | PlanNode::Select { input, .. }
            | PlanNode::Aggregate { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Slice { input, .. }
            | PlanNode::Distinct { input, .. } => vec![*input],
            PlanNode::Join { left, right, .. } => vec![*left, *right],
            PlanNode::Union { inputs } => inputs.clone(),
        }
    }

    /// Same node with its inputs replaced positionally.
    pub fn with_inputs(&self, new_inputs: &[NodeId]) -> Result<PlanNode> {
        let expected = self.inputs().len();
        if new_inputs.len() != expected {
            return Err(Error::Invariant(format!(
                "{} expects {expected} inputs, got {}",
                self.kind(),
                new_inputs.len()
            )));
        }
        let mut node = self.clone();
        match &mut node {
            PlanNode::Scan { .. } => {}
            PlanNode::Filter { input, .. }
            | PlanNode::Select { input, .. }
            | PlanNode::Aggregate { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Slice { input, .. }
            | PlanNode::Distinct { input, .. } => *input = new_inputs[0],
            PlanNode::Join { left, right, .. } => {
                *left = new_inputs[0];
                *right = new_inputs[1];
            }
            PlanNode::Union { inputs } => *inputs = new_inputs.to_vec(),
        }
        Ok(node)
    }

    /// Validate the node and derive its output schema.
    pub fn infer_schema(&self, inputs: &[&Schema]) -> Result<Schema> {
        let expected = self.inputs().len();
        if inputs.len() != expected {
            return Err(Error::Invariant(format!(
                "{} expects {expected} input schemas, got {}",
                self.kind(),
                inputs.len()
            )));
        }
        let schema = match self {
            PlanNode::Scan {
                source,
                projection,
                predicate,
                ..
            } => {
                let full = source.schema();
                if let Some(pred) = predicate {
                    check_predicate(pred, &full)?;
                }
                match projection {
                    Some(cols) => full.project(cols)?,
                    None => full,
                }
            }
            PlanNode::Filter { predicate, .. } => {
                check_predicate(predicate, inputs[0])?;
                inputs[0].clone()
            }
            PlanNode::Select { exprs, .. } => {
                if exprs.is_empty() {
                    return Err(Error::Schema("select requires at least one expression".into()));
                }
                let fields = exprs
                    .iter()
                    .map(|e| {
                        if e.contains_agg() {
                            return Err(Error::Schema(format!(
                                "aggregation {e} is only allowed inside group_by().agg()"
                            )));
                        }
                        e.to_field(inputs[0])
                    })
                    .collect::<Result<Vec<_>>>()?;
                Schema::new(fields)
            }
            PlanNode::Aggregate { keys, aggs, .. } => {
                let input = inputs[0];
                let mut fields = Vec::with_capacity(keys.len() + aggs.len());
                for k in keys {
                    fields.push(input.require(k)?.clone());
                }
                for a in aggs {
                    if !a.is_valid_aggregation() {
                        return Err(Error::Schema(format!(
                            "agg() expects aggregation expressions, got {a}"
                        )));
                    }
                    fields.push(a.to_field(input)?);
                }
                Schema::new(fields)
            }
            PlanNode::Join {
                left_on,
                right_on,
                how,
                ..
            } => join_schema(inputs[0], inputs[1], left_on, right_on, *how)?,
            PlanNode::Sort { by, .. } => {
                if by.is_empty() {
                    return Err(Error::Schema("sort requires at least one key".into()));
                }
                for key in by {
                    let f = inputs[0].require(&key.column)?;
                    if !f.data_type.is_orderable() {
                        return Err(Error::Schema(format!(
                            "cannot sort by '{}' of type {}",
                            f.name, f.data_type
                        )));
                    }
                }
                inputs[0].clone()
            }
            PlanNode::Slice { .. } => inputs[0].clone(),
            PlanNode::Union { .. } => union_schema(inputs)?,
            PlanNode::Distinct { subset, .. } => {
                if let Some(cols) = subset {
                    if cols.is_empty() {
                        return Err(Error::Schema("distinct subset must not be empty".into()));
                    }
                    for c in cols {
                        inputs[0].require(c)?;
                    }
                }
                inputs[0].clone()
            }
        };
        schema.check_unique_names()?;
        Ok(schema)
    }

    /// Structural fingerprint from kind, parameters and child fingerprints.
    pub fn fingerprint(&self, children: &[Hash256]) -> Result<Hash256> {
        let params = match self {
            PlanNode::Scan {
                source,
                projection,
                predicate,
                limit,
            } => json!({
                "source": source,
                "projection": projection,
                "predicate": predicate,
                "limit": limit,
            }),
            PlanNode::Filter { predicate, .. } => json!({ "predicate": predicate }),
            PlanNode::Select { exprs, .. } => json!({ "exprs": exprs }),
            PlanNode::Aggregate {
                keys,
                aggs,
                maintain_order,
                ..
            } => json!({ "keys": keys, "aggs": aggs, "maintain_order": maintain_order }),
            PlanNode::Join {
                left_on,
                right_on,
                how,
                ..
            } => json!({ "left_on": left_on, "right_on": right_on, "how": how }),
            PlanNode::Sort { by, limit, .. } => json!({ "by": by, "limit": limit }),
            PlanNode::Slice { offset, len, .. } => json!({ "offset": offset, "len": len }),
            PlanNode::Union { .. } => json!({}),
            PlanNode::Distinct { subset, .. } => json!({ "subset": subset }),
        };
        hash_node(self.kind(), &params, children)
    }

    /// One-line description without inputs, used by `explain`.
    pub fn describe(&self) -> String {
        match self {
            PlanNode::Scan {
                source,
                projection,
                predicate,
                limit,
            } => {
                let mut s = format!("SCAN {}", source.identity());
                if let Some(p) = projection {
                    s.push_str(&format!(" PROJECT [{}]", p.join(", ")));
                }
                if let Some(p) = predicate {
                    s.push_str(&format!(" WHERE {p}"));
                }
                if let Some(l) = limit {
                    s.push_str(&format!(" LIMIT {l}"));
                }
                s
            }
            PlanNode::Filter { predicate, .. } => format!("FILTER {predicate}"),
            PlanNode::Select { exprs, .. } => format!("SELECT [{}]", join_display(exprs)),
            PlanNode::Aggregate {
                keys,
                aggs,
                maintain_order,
                ..
            } => format!(
                "AGGREGATE BY [{}] [{}]{}",
                keys.join(", "),
                join_display(aggs),
                if *maintain_order { " MAINTAIN ORDER" } else { "" }
            ),
            PlanNode::Join {
                left_on,
                right_on,
                how,
                ..
            } => format!(
                "JOIN {how} ON [{}] = [{}]",
                left_on.join(", "),
                right_on.join(", ")
            ),
            PlanNode::Sort { by, limit, .. } => {
                let keys: Vec<String> = by
                    .iter()
                    .map(|k| {
                        format!(
                            "{}{}{}",
                            k.column,
                            if k.descending { " DESC" } else { "" },
                            if k.nulls_last { " NULLS LAST" } else { "" }
                        )
                    })
                    .collect();
                match limit {
                    Some(l) => format!("SORT [{}] LIMIT {l}", keys.join(", ")),
                    None => format!("SORT [{}]", keys.join(", ")),
                }
            }
            PlanNode::Slice { offset, len, .. } => format!("SLICE offset={offset} len={len}"),
            PlanNode::Union { inputs } => format!("UNION ({} inputs)", inputs.len()),
            PlanNode::Distinct { subset, .. } => match subset {
                Some(cols) => format!("DISTINCT ON [{}]", cols.join(", ")),
                None => "DISTINCT".to_string(),
            },
        }
    }
}

fn join_display(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_predicate(predicate: &Expr, schema: &Schema) -> Result<()> {
    if predicate.contains_agg() {
        return Err(Error::Schema(format!(
            "aggregation in predicate {predicate} is not allowed"
        )));
    }
    let dt = predicate.data_type(schema)?;
    if !matches!(dt, DataType::Boolean | DataType::Null) {
        return Err(Error::Schema(format!(
            "predicate {predicate} must be Boolean, got {dt}"
        )));
    }
    Ok(())
}

/// Output schema of a join; see [`JOIN_SUFFIX`] for name collisions.
pub fn join_schema(
    left: &Schema,
    right: &Schema,
    left_on: &[String],
    right_on: &[String],
    how: JoinType,
) -> Result<Schema> {
    if left_on.is_empty() || left_on.len() != right_on.len() {
        return Err(Error::Arity(format!(
            "join needs the same non-zero number of keys on both sides, got {} and {}",
            left_on.len(),
            right_on.len()
        )));
    }
    for (l, r) in left_on.iter().zip(right_on.iter()) {
        let lt = left.require(l)?.data_type;
        let rt = right.require(r)?.data_type;
        if DataType::unify(lt, rt).is_none() {
            return Err(Error::Arity(format!(
                "join key '{l}' ({lt}) is not comparable with '{r}' ({rt})"
            )));
        }
    }
    if matches!(how, JoinType::Semi | JoinType::Anti) {
        return Ok(left.clone());
    }
    let mut fields = left.fields.clone();
    for f in right.fields.iter().filter(|f| !right_on.contains(&f.name)) {
        let name = if left.contains(&f.name) {
            format!("{}{JOIN_SUFFIX}", f.name)
        } else {
            f.name.clone()
        };
        fields.push(Field::new(
            name,
            f.data_type,
            f.nullable || how == JoinType::Left,
        ));
    }
    Ok(Schema::new(fields))
}

fn union_schema(inputs: &[&Schema]) -> Result<Schema> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(Error::Arity("union requires at least one input".into()));
    };
    let mut out = (*first).clone();
    for (i, s) in rest.iter().enumerate() {
        if !first.same_shape(s) {
            return Err(Error::Arity(format!(
                "union input {} has schema {s}, expected {first}",
                i + 1
            )));
        }
        for (dst, src) in out.fields.iter_mut().zip(s.fields.iter()) {
            dst.nullable |= src.nullable;
        }
    }
    Ok(out)
}

/// Columns an expression list reads, as a set.
pub fn referenced_columns<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> HashSet<String> {
    exprs.into_iter().flat_map(|e| e.columns()).collect()
}
