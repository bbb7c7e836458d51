//! Pushes row limits toward the sources.
//!
//! State is the number of leading rows a consumer will read (`None` = all).
//! Slice nodes themselves always stay in place, so a limit that cannot pass
//! a node is simply dropped; the slice above still truncates.

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::{JoinType, PlanNode};

use super::{Rewriter, TopDown};
use crate::optimizer::Rule;

#[derive(Debug, Default)]
pub struct SlicePushdown;

impl Rule for SlicePushdown {
    fn name(&self) -> &'static str {
        "slice_pushdown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        Pass {
            rw: Rewriter::new(plan)?,
        }
        .run()
    }
}

fn tighten(existing: Option<usize>, needed: Option<usize>) -> Option<usize> {
    match (existing, needed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

struct Pass<'a> {
    rw: Rewriter<'a>,
}

impl<'a> TopDown<'a> for Pass<'a> {
    type State = Option<usize>;

    fn rewriter(&mut self) -> &mut Rewriter<'a> {
        &mut self.rw
    }

    fn settle(&mut self, new: NodeId, _needed: Option<usize>) -> Result<NodeId> {
        Ok(new)
    }

    fn descend(&mut self, old: NodeId, needed: Option<usize>) -> Result<NodeId> {
        match self.rw.node(old)? {
            PlanNode::Slice { input, offset, len } if offset >= 0 => {
                let mut offset = offset as usize;
                let mut len = tighten(Some(len), needed).unwrap_or(len);
                let mut input = input;
                // Fuse a chain of forward slices into one.
                while !self.rw.is_shared(input) {
                    match self.rw.node(input)? {
                        PlanNode::Slice {
                            input: inner,
                            offset: inner_offset,
                            len: inner_len,
                        } if inner_offset >= 0 => {
                            len = len.min(inner_len.saturating_sub(offset));
                            offset = offset.saturating_add(inner_offset as usize);
                            input = inner;
                        }
                        _ => break,
                    }
                }
                let input = self.visit(input, Some(offset.saturating_add(len)))?;
                self.rw.add(PlanNode::Slice {
                    input,
                    offset: offset as i64,
                    len,
                })
            }
            PlanNode::Scan {
                source,
                projection,
                predicate,
                limit,
            } => self.rw.add(PlanNode::Scan {
                source,
                projection,
                predicate,
                limit: tighten(limit, needed),
            }),
            PlanNode::Select { input, exprs } => {
                let input = self.visit(input, needed)?;
                self.rw.add(PlanNode::Select { input, exprs })
            }
            PlanNode::Sort { input, by, limit } => {
                let input = self.visit(input, None)?;
                self.rw.add(PlanNode::Sort {
                    input,
                    by,
                    limit: tighten(limit, needed),
                })
            }
            PlanNode::Union { inputs } => {
                let inputs = inputs
                    .into_iter()
                    .map(|i| self.visit(i, needed))
                    .collect::<Result<Vec<_>>>()?;
                self.rw.add(PlanNode::Union { inputs })
            }
            // Every left row appears at least once, in order.
            PlanNode::Join {
                left,
                right,
                left_on,
                right_on,
                how: JoinType::Left,
            } => {
                let left = self.visit(left, needed)?;
                let right = self.visit(right, None)?;
                self.rw.add(PlanNode::Join {
                    left,
                    right,
                    left_on,
                    right_on,
                    how: JoinType::Left,
                })
            }
            other => {
                let inputs = other
                    .inputs()
                    .into_iter()
                    .map(|i| self.visit(i, None))
                    .collect::<Result<Vec<_>>>()?;
                self.rw.add(other.with_inputs(&inputs)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LazyFrame;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::plan::SortKey;
    use lazyplan_core::types::Scalar;
    use lazyplan_io::MemorySource;

    fn frame() -> LazyFrame {
        let src = MemorySource::from_columns(
            "t",
            vec![("id", (0..100).map(Scalar::I64).collect())],
        )
        .unwrap();
        LazyFrame::scan(src).unwrap()
    }

    fn run(lf: &LazyFrame) -> LogicalPlan {
        SlicePushdown.apply(&lf.logical_plan().unwrap()).unwrap()
    }

    fn scan_limit(plan: &LogicalPlan) -> Option<usize> {
        plan.topo_order()
            .unwrap()
            .into_iter()
            .find_map(|id| match plan.node(id).unwrap() {
                PlanNode::Scan { limit, .. } => Some(*limit),
                _ => None,
            })
            .flatten()
    }

    #[test]
    fn head_reaches_the_scan_through_select() {
        let lf = frame().select([col("id")]).unwrap().head(5).unwrap();
        assert_eq!(scan_limit(&run(&lf)), Some(5));
    }

    #[test]
    fn filter_blocks_the_limit() {
        let lf = frame().filter(col("id").gt(lit(10i64))).unwrap().head(5).unwrap();
        assert_eq!(scan_limit(&run(&lf)), None);
    }

    #[test]
    fn nested_slices_fuse_and_sort_becomes_top_k() {
        let lf = frame().slice(10, 50).unwrap().slice(5, 100).unwrap();
        let plan = run(&lf);
        match plan.node(plan.roots[0]).unwrap() {
            PlanNode::Slice { offset, len, .. } => assert_eq!((*offset, *len), (15, 45)),
            other => panic!("expected slice, got {}", other.kind()),
        }
        assert_eq!(scan_limit(&plan), Some(60));

        let lf = frame().sort([SortKey::desc("id")]).unwrap().head(3).unwrap();
        let plan = run(&lf);
        let PlanNode::Slice { input, .. } = plan.node(plan.roots[0]).unwrap() else {
            panic!("slice must stay at the root");
        };
        assert!(matches!(
            plan.node(*input).unwrap(),
            PlanNode::Sort { limit: Some(3), .. }
        ));
        assert_eq!(scan_limit(&plan), None);
    }
}
