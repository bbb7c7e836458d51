//! Narrows every node to the columns its consumers read.
//!
//! State is the set of required output columns (`None` = all, in order).
//! A rewritten node may still produce extra columns; consumers address
//! columns by name, and roots are always visited with `None`.

use std::collections::HashSet;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;
use lazyplan_core::expr::Expr;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::{referenced_columns, JoinType, PlanNode, JOIN_SUFFIX};

use super::{Rewriter, TopDown};
use crate::optimizer::Rule;

#[derive(Debug, Default)]
pub struct ProjectionPushdown;

impl Rule for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "projection_pushdown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        Pass {
            rw: Rewriter::new(plan)?,
        }
        .run()
    }
}

type Required = Option<HashSet<String>>;

fn with(required: &Required, extra: impl IntoIterator<Item = String>) -> Required {
    required.as_ref().map(|r| {
        let mut r = r.clone();
        r.extend(extra);
        r
    })
}

struct Pass<'a> {
    rw: Rewriter<'a>,
}

impl<'a> Pass<'a> {
    /// Visit `input` requiring exactly `names`, in that order.
    fn exact(&mut self, input: NodeId, names: &[String]) -> Result<NodeId> {
        let new = self.visit(input, Some(names.iter().cloned().collect()))?;
        if self.rw.new_schema(new)?.names() == names {
            return Ok(new);
        }
        self.rw.add(PlanNode::Select {
            input: new,
            exprs: names.iter().map(|n| Expr::Column(n.clone())).collect(),
        })
    }
}

impl<'a> TopDown<'a> for Pass<'a> {
    type State = Required;

    fn rewriter(&mut self) -> &mut Rewriter<'a> {
        &mut self.rw
    }

    fn settle(&mut self, new: NodeId, _required: Required) -> Result<NodeId> {
        Ok(new)
    }

    fn descend(&mut self, old: NodeId, required: Required) -> Result<NodeId> {
        let node = self.rw.node(old)?;
        match node {
            PlanNode::Scan {
                source,
                projection,
                predicate,
                limit,
            } => {
                let projection = match &required {
                    None => projection,
                    Some(req) => {
                        let current = self.rw.old_schema(old)?.names();
                        let mut kept: Vec<String> =
                            current.iter().filter(|c| req.contains(*c)).cloned().collect();
                        // Zero columns would also lose the row count.
                        if kept.is_empty() {
                            kept = current.into_iter().take(1).collect();
                        }
                        Some(kept)
                    }
                };
                self.rw.add(PlanNode::Scan {
                    source,
                    projection,
                    predicate,
                    limit,
                })
            }
            PlanNode::Filter { input, predicate } => {
                let input = self.visit(input, with(&required, predicate.columns()))?;
                self.rw.add(PlanNode::Filter { input, predicate })
            }
            PlanNode::Select { input, exprs } => {
                let exprs: Vec<Expr> = match &required {
                    None => exprs,
                    Some(req) => {
                        let kept: Vec<Expr> = exprs
                            .iter()
                            .filter(|e| req.contains(&e.output_name()))
                            .cloned()
                            .collect();
                        if kept.is_empty() {
                            exprs.into_iter().take(1).collect()
                        } else {
                            kept
                        }
                    }
                };
                let input = self.visit(input, Some(referenced_columns(&exprs)))?;
                self.rw.add(PlanNode::Select { input, exprs })
            }
            PlanNode::Aggregate {
                input,
                keys,
                aggs,
                maintain_order,
            } => {
                let aggs: Vec<Expr> = match &required {
                    None => aggs,
                    Some(req) => {
                        let kept: Vec<Expr> = aggs
                            .iter()
                            .filter(|e| req.contains(&e.output_name()))
                            .cloned()
                            .collect();
                        if kept.is_empty() && keys.is_empty() {
                            aggs.into_iter().take(1).collect()
                        } else {
                            kept
                        }
                    }
                };
                let mut needed = referenced_columns(&aggs);
                needed.extend(keys.iter().cloned());
                let input = self.visit(input, Some(needed))?;
                self.rw.add(PlanNode::Aggregate {
                    input,
                    keys,
                    aggs,
                    maintain_order,
                })
            }
            PlanNode::Sort { input, by, limit } => {
                let input = self.visit(
                    input,
                    with(&required, by.iter().map(|k| k.column.clone())),
                )?;
                self.rw.add(PlanNode::Sort { input, by, limit })
            }
            PlanNode::Slice { input, offset, len } => {
                let input = self.visit(input, required)?;
                self.rw.add(PlanNode::Slice { input, offset, len })
            }
            PlanNode::Distinct { input, subset } => {
                let input_req = match &subset {
                    Some(cols) => with(&required, cols.iter().cloned()),
                    None => None,
                };
                let input = self.visit(input, input_req)?;
                self.rw.add(PlanNode::Distinct { input, subset })
            }
            PlanNode::Union { inputs } => {
                let out_names = self.rw.old_schema(old)?.names();
                let wanted: Vec<usize> = match &required {
                    None => (0..out_names.len()).collect(),
                    Some(req) => {
                        let idx: Vec<usize> = out_names
                            .iter()
                            .enumerate()
                            .filter(|(_, n)| req.contains(*n))
                            .map(|(i, _)| i)
                            .collect();
                        if idx.is_empty() {
                            vec![0]
                        } else {
                            idx
                        }
                    }
                };
                let mut new_inputs = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let in_names = self.rw.old_schema(input)?.names();
                    let names: Vec<String> = wanted.iter().map(|&i| in_names[i].clone()).collect();
                    new_inputs.push(self.exact(input, &names)?);
                }
                self.rw.add(PlanNode::Union { inputs: new_inputs })
            }
            PlanNode::Join {
                left,
                right,
                left_on,
                right_on,
                how,
            } => {
                let left_names = self.rw.old_schema(left)?.names();
                let right_names = self.rw.old_schema(right)?.names();
                let (left_req, right_req) = if matches!(how, JoinType::Semi | JoinType::Anti) {
                    (
                        with(&required, left_on.iter().cloned()),
                        Some(right_on.iter().cloned().collect()),
                    )
                } else {
                    match &required {
                        None => (None, None),
                        Some(req) => {
                            let mut right_req: HashSet<String> = right_on.iter().cloned().collect();
                            let mut left_req: HashSet<String> = left_on.iter().cloned().collect();
                            for n in right_names.iter().filter(|n| !right_on.contains(n)) {
                                let collides = left_names.contains(n);
                                let out = if collides {
                                    format!("{n}{JOIN_SUFFIX}")
                                } else {
                                    n.clone()
                                };
                                if req.contains(&out) {
                                    right_req.insert(n.clone());
                                    // Keep the suffix stable.
                                    if collides {
                                        left_req.insert(n.clone());
                                    }
                                }
                            }
                            left_req.extend(
                                left_names.iter().filter(|n| req.contains(*n)).cloned(),
                            );
                            (Some(left_req), Some(right_req))
                        }
                    }
                };
                let left = self.visit(left, left_req)?;
                let right = self.visit(right, right_req)?;
                self.rw.add(PlanNode::Join {
                    left,
                    right,
                    left_on,
                    right_on,
                    how,
                })
            }
        }
    }
}
