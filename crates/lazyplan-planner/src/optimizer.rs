//! The optimizer pass pipeline.
//!
//! Passes run once each, in a fixed order. Every pass must preserve the
//! shape (names and types) of each root; this is checked after every pass
//! rather than trusted.

use std::fmt;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::config::OptimizerConfig;
use lazyplan_core::error::{Error, Result};
use thiserror::Error;

use crate::rules::{
    CommonSubplanElimination, PredicatePushdown, ProjectionPushdown, Simplify, SlicePushdown,
};

/// One rewrite pass over a whole (possibly multi-root) plan.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan>;
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("pass '{pass}' changed the schema of root {root}")]
    SchemaDrift { pass: &'static str, root: usize },

    #[error("optimizer: {0}")]
    Core(#[from] Error),
}

pub struct Optimizer {
    rules: Vec<Box<dyn Rule>>,
    /// Re-intern after the last pass; later passes can make subplans equal.
    share_final: bool,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl Optimizer {
    pub fn new(config: &OptimizerConfig) -> Self {
        let mut rules: Vec<Box<dyn Rule>> = Vec::new();
        if config.predicate_pushdown {
            rules.push(Box::new(PredicatePushdown));
        }
        if config.projection_pushdown {
            rules.push(Box::new(ProjectionPushdown));
        }
        if config.slice_pushdown {
            rules.push(Box::new(SlicePushdown));
        }
        if config.common_subplan_elimination {
            rules.push(Box::new(CommonSubplanElimination));
        }
        if config.simplify {
            rules.push(Box::new(Simplify));
        }
        Self {
            rules,
            share_final: config.common_subplan_elimination,
        }
    }

    /// Append a pass after the configured ones.
    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn try_optimize(&self, plan: &LogicalPlan) -> Result<LogicalPlan, OptimizeError> {
        let expected = plan.root_schemas()?;
        let mut current = plan.compact()?;
        for rule in &self.rules {
            let before = current.arena.len();
            let next = rule.apply(&current)?;
            let actual = next.root_schemas()?;
            if actual.len() != expected.len() {
                return Err(OptimizeError::SchemaDrift {
                    pass: rule.name(),
                    root: actual.len().min(expected.len()),
                });
            }
            if let Some(root) = expected
                .iter()
                .zip(actual.iter())
                .position(|(e, a)| !e.same_shape(a))
            {
                return Err(OptimizeError::SchemaDrift {
                    pass: rule.name(),
                    root,
                });
            }
            current = next.compact()?;
            tracing::debug!(
                pass = rule.name(),
                nodes_before = before,
                nodes_after = current.arena.len(),
                "optimizer pass"
            );
        }
        if self.share_final {
            let before = current.arena.len();
            current = current.interned()?;
            tracing::debug!(
                nodes_before = before,
                nodes_after = current.arena.len(),
                "final subplan sharing"
            );
        }
        Ok(current)
    }

    /// Like `try_optimize`, but a failing pass falls back to the plan as built.
    pub fn optimize(&self, plan: &LogicalPlan) -> LogicalPlan {
        match self.try_optimize(plan) {
            Ok(optimized) => optimized,
            Err(e) => {
                tracing::warn!(error = %e, "optimization failed; executing the unoptimized plan");
                plan.clone()
            }
        }
    }
}

pub fn try_optimize(
    plan: &LogicalPlan,
    config: &OptimizerConfig,
) -> Result<LogicalPlan, OptimizeError> {
    Optimizer::new(config).try_optimize(plan)
}

pub fn optimize(plan: &LogicalPlan, config: &OptimizerConfig) -> LogicalPlan {
    Optimizer::new(config).optimize(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LazyFrame;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::plan::{JoinType, PlanNode, SortKey};
    use lazyplan_core::source::SourceRef;
    use lazyplan_core::types::Scalar;
    use lazyplan_io::MemorySource;

    fn frame(name: &str) -> LazyFrame {
        let src = MemorySource::from_columns(
            name,
            vec![
                ("id", (0..10).map(Scalar::I64).collect()),
                ("grp", (0..10).map(|i| Scalar::Str(format!("g{}", i % 3))).collect()),
                ("score", (0..10).map(|i| Scalar::F64(i as f64 / 2.0)).collect()),
            ],
        )
        .unwrap();
        LazyFrame::scan(src).unwrap()
    }

    /// Replaces every root with its first input.
    struct DropRoot;

    impl Rule for DropRoot {
        fn name(&self) -> &'static str {
            "drop_root"
        }

        fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
            let mut out = plan.clone();
            for root in out.roots.iter_mut() {
                if let Some(first) = plan.node(*root)?.inputs().first() {
                    *root = *first;
                }
            }
            Ok(out)
        }
    }

    struct Failing;

    impl Rule for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn apply(&self, _plan: &LogicalPlan) -> Result<LogicalPlan> {
            Err(Error::Invariant("boom".into()))
        }
    }

    fn sample() -> LazyFrame {
        let left = frame("l")
            .filter(col("score").gt(lit(1.0)).and(lit(true)))
            .unwrap();
        let right = frame("r").select([col("id"), col("grp")]).unwrap();
        left.join(&right, ["id"], ["id"], JoinType::Left)
            .unwrap()
            .filter(col("id").lt(lit(8i64)))
            .unwrap()
            .select([col("id"), col("grp_right")])
            .unwrap()
            .sort([SortKey::desc("id")])
            .unwrap()
            .head(3)
            .unwrap()
    }

    #[test]
    fn drift_is_detected_and_optimize_falls_back() {
        let lf = frame("t").select([col("id")]).unwrap();
        let plan = lf.logical_plan().unwrap();
        let opt = Optimizer::new(&OptimizerConfig::none()).with_rule(Box::new(DropRoot));
        assert!(matches!(
            opt.try_optimize(&plan),
            Err(OptimizeError::SchemaDrift { pass: "drop_root", root: 0 })
        ));
        assert_eq!(
            opt.optimize(&plan).fingerprint().unwrap(),
            plan.fingerprint().unwrap()
        );

        let opt = Optimizer::new(&OptimizerConfig::default()).with_rule(Box::new(Failing));
        assert!(matches!(opt.try_optimize(&plan), Err(OptimizeError::Core(_))));
        assert_eq!(opt.optimize(&plan).arena.len(), plan.arena.len());
    }

    #[test]
    fn full_pipeline_preserves_shape_and_is_idempotent() {
        let plan = sample().logical_plan().unwrap();
        let config = OptimizerConfig::default();
        let once = try_optimize(&plan, &config).unwrap();
        let twice = try_optimize(&once, &config).unwrap();
        assert_eq!(once.fingerprint().unwrap(), twice.fingerprint().unwrap());
        assert!(once.root_schemas().unwrap()[0].same_shape(&plan.root_schemas().unwrap()[0]));

        // Both predicates ended up in the scans; the always-true conjunct is gone.
        let scans: Vec<PlanNode> = once
            .topo_order()
            .unwrap()
            .into_iter()
            .map(|id| once.node(id).unwrap().clone())
            .filter(|n| matches!(n, PlanNode::Scan { .. }))
            .collect();
        assert_eq!(scans.len(), 2);
        match &scans[0] {
            PlanNode::Scan {
                predicate,
                projection,
                ..
            } => {
                assert_eq!(
                    predicate.as_ref(),
                    Some(&col("score").gt(lit(1.0)).and(col("id").lt(lit(8i64))))
                );
                // `grp` stays so the right side's `grp` keeps its suffix.
                assert_eq!(projection.as_deref(), Some(&["id".to_string(), "grp".to_string()][..]));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn subplans_equal_only_after_simplify_are_shared_in_one_pass() {
        let src = SourceRef::new(
            MemorySource::from_columns("s", vec![("id", (0..6).map(Scalar::I64).collect())])
                .unwrap(),
        );
        let a = LazyFrame::scan_ref(src.clone())
            .unwrap()
            .filter(lit(1i64).lt(lit(2i64)))
            .unwrap()
            .select([col("id")])
            .unwrap();
        let b = LazyFrame::scan_ref(src).unwrap().select([col("id")]).unwrap();
        let plan = a.union(&[b]).unwrap().logical_plan().unwrap();

        let config = OptimizerConfig::default();
        let once = try_optimize(&plan, &config).unwrap();
        let twice = try_optimize(&once, &config).unwrap();
        assert_eq!(once.arena.len(), twice.arena.len());
        let counts = |p: &LogicalPlan| {
            let mut c: Vec<usize> = p.consumer_counts().unwrap().into_values().collect();
            c.sort_unstable();
            c
        };
        assert_eq!(counts(&once), counts(&twice));
        assert_eq!(once.fingerprint().unwrap(), twice.fingerprint().unwrap());
        // union + one scan read by both union inputs
        assert_eq!(once.arena.len(), 2);
        assert_eq!(counts(&once), vec![1, 2]);
    }

    #[test]
    fn disabled_passes_leave_the_plan_alone() {
        let plan = sample().logical_plan().unwrap();
        let out = try_optimize(&plan, &OptimizerConfig::none()).unwrap();
        assert_eq!(out.fingerprint().unwrap(), plan.fingerprint().unwrap());
        assert!(Optimizer::new(&OptimizerConfig::none()).pass_names().is_empty());
    }
}
