//! Moves filter conjuncts toward the sources.

use std::collections::HashMap;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;
use lazyplan_core::expr::Expr;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::{JoinType, PlanNode, JOIN_SUFFIX};

use super::{Rewriter, TopDown};
use crate::optimizer::Rule;

#[derive(Debug, Default)]
pub struct PredicatePushdown;

impl Rule for PredicatePushdown {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        Pass {
            rw: Rewriter::new(plan)?,
        }
        .run()
    }
}

struct Pass<'a> {
    rw: Rewriter<'a>,
}

impl<'a> Pass<'a> {
    fn wrap(&mut self, input: NodeId, preds: Vec<Expr>) -> Result<NodeId> {
        match Expr::conjunction(preds) {
            Some(predicate) => self.rw.add(PlanNode::Filter { input, predicate }),
            None => Ok(input),
        }
    }

    /// Push what `route` accepts into `input`, keep the rest above `node`.
    fn split<F>(preds: Vec<Expr>, mut route: F) -> (Vec<Expr>, Vec<Expr>)
    where
        F: FnMut(&Expr) -> bool,
    {
        preds.into_iter().partition(|p| route(p))
    }
}

impl<'a> TopDown<'a> for Pass<'a> {
    type State = Vec<Expr>;

    fn rewriter(&mut self) -> &mut Rewriter<'a> {
        &mut self.rw
    }

    fn settle(&mut self, new: NodeId, preds: Vec<Expr>) -> Result<NodeId> {
        self.wrap(new, preds)
    }

    fn descend(&mut self, old: NodeId, preds: Vec<Expr>) -> Result<NodeId> {
        match self.rw.node(old)? {
            PlanNode::Filter { input, predicate } => {
                let mut all = predicate.split_conjunction();
                all.extend(preds);
                self.visit(input, all)
            }
            PlanNode::Scan {
                source,
                projection,
                predicate,
                limit: None,
            } => {
                let mut all = predicate.map(Expr::split_conjunction).unwrap_or_default();
                for p in preds {
                    if !all.contains(&p) {
                        all.push(p);
                    }
                }
                self.rw.add(PlanNode::Scan {
                    source,
                    projection,
                    predicate: Expr::conjunction(all),
                    limit: None,
                })
            }
            PlanNode::Select { input, exprs } => {
                // Output name -> input column, for pass-through columns only.
                let passthrough: HashMap<String, String> = exprs
                    .iter()
                    .filter_map(|e| {
                        e.unaliased()
                            .as_column()
                            .map(|src| (e.output_name(), src.to_string()))
                    })
                    .collect();
                let (down, keep) = Self::split(preds, |p| {
                    p.columns().iter().all(|c| passthrough.contains_key(c))
                });
                let down = down
                    .into_iter()
                    .map(|p| p.rename_columns(&passthrough))
                    .collect();
                let input = self.visit(input, down)?;
                let node = self.rw.add(PlanNode::Select { input, exprs })?;
                self.wrap(node, keep)
            }
            PlanNode::Sort {
                input,
                by,
                limit: None,
            } => {
                let input = self.visit(input, preds)?;
                self.rw.add(PlanNode::Sort {
                    input,
                    by,
                    limit: None,
                })
            }
            PlanNode::Union { inputs } => {
                let out_names = self.rw.old_schema(old)?.names();
                let mut new_inputs = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let in_names = self.rw.old_schema(input)?.names();
                    let rename: HashMap<String, String> =
                        out_names.iter().cloned().zip(in_names).collect();
                    let local = preds.iter().map(|p| p.clone().rename_columns(&rename)).collect();
                    new_inputs.push(self.visit(input, local)?);
                }
                self.rw.add(PlanNode::Union { inputs: new_inputs })
            }
            PlanNode::Aggregate {
                input,
                keys,
                aggs,
                maintain_order,
            } => {
                let (down, keep) = Self::split(preds, |p| {
                    let cols = p.columns();
                    !cols.is_empty() && cols.iter().all(|c| keys.contains(c))
                });
                let input = self.visit(input, down)?;
                let node = self.rw.add(PlanNode::Aggregate {
                    input,
                    keys,
                    aggs,
                    maintain_order,
                })?;
                self.wrap(node, keep)
            }
            PlanNode::Distinct { input, subset } => {
                let (down, keep) = Self::split(preds, |p| {
                    let cols = p.columns();
                    !cols.is_empty()
                        && subset
                            .as_ref()
                            .map_or(true, |s| cols.iter().all(|c| s.contains(c)))
                });
                let input = self.visit(input, down)?;
                let node = self.rw.add(PlanNode::Distinct { input, subset })?;
                self.wrap(node, keep)
            }
            PlanNode::Join {
                left,
                right,
                left_on,
                right_on,
                how,
            } => {
                let left_names = self.rw.old_schema(left)?.names();
                // Output name -> right input column, for right non-key columns.
                let right_map: HashMap<String, String> = self
                    .rw
                    .old_schema(right)?
                    .names()
                    .into_iter()
                    .filter(|n| !right_on.contains(n))
                    .map(|n| {
                        let out = if left_names.contains(&n) {
                            format!("{n}{JOIN_SUFFIX}")
                        } else {
                            n.clone()
                        };
                        (out, n)
                    })
                    .collect();
                let mut to_left = Vec::new();
                let mut to_right = Vec::new();
                let mut keep = Vec::new();
                for p in preds {
                    let cols = p.columns();
                    if !cols.is_empty() && cols.iter().all(|c| left_names.contains(c)) {
                        to_left.push(p);
                    } else if how == JoinType::Inner
                        && !cols.is_empty()
                        && cols.iter().all(|c| right_map.contains_key(c))
                    {
                        to_right.push(p.rename_columns(&right_map));
                    } else {
                        keep.push(p);
                    }
                }
                let left = self.visit(left, to_left)?;
                let right = self.visit(right, to_right)?;
                let node = self.rw.add(PlanNode::Join {
                    left,
                    right,
                    left_on,
                    right_on,
                    how,
                })?;
                self.wrap(node, keep)
            }
            // Limits (scan, sort, slice) pin the rows a predicate may see.
            other => {
                let inputs = other
                    .inputs()
                    .into_iter()
                    .map(|i| self.visit(i, Vec::new()))
                    .collect::<Result<Vec<_>>>()?;
                let node = self.rw.add(other.with_inputs(&inputs)?)?;
                self.wrap(node, preds)
            }
        }
    }
}
