//! Constant folding and boolean identities, plus removal of filters that
//! always pass and selects that return their input unchanged.
//!
//! Folding goes through the same scalar kernels the evaluator uses. A fold
//! that errors (overflow, bad cast) keeps the original expression so the
//! failure still happens at execution, on the rows that trigger it.

use std::collections::HashMap;

use lazyplan_core::arena::{LogicalPlan, PlanArena};
use lazyplan_core::error::{Error, Result};
use lazyplan_core::expr::{can_cast, BinaryOp, Expr, UnaryOp};
use lazyplan_core::id::NodeId;
use lazyplan_core::kernels;
use lazyplan_core::plan::PlanNode;
use lazyplan_core::schema::Schema;
use lazyplan_core::types::Scalar;

use crate::optimizer::Rule;

#[derive(Debug, Default)]
pub struct Simplify;

impl Rule for Simplify {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        let mut arena = PlanArena::new();
        let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();
        for old in plan.topo_order()? {
            let node = plan.node(old)?;
            let inputs = node
                .inputs()
                .iter()
                .map(|i| lookup(&mapped, *i))
                .collect::<Result<Vec<_>>>()?;
            let new = simplify_node(&mut arena, node.with_inputs(&inputs)?)?;
            mapped.insert(old, new);
        }
        let roots = plan
            .roots
            .iter()
            .map(|r| lookup(&mapped, *r))
            .collect::<Result<Vec<_>>>()?;
        Ok(LogicalPlan::new(arena, roots))
    }
}

fn lookup(mapped: &HashMap<NodeId, NodeId>, id: NodeId) -> Result<NodeId> {
    mapped
        .get(&id)
        .copied()
        .ok_or_else(|| Error::Invariant(format!("{id} visited before its inputs")))
}

fn is_bool(e: &Expr, value: bool) -> bool {
    matches!(e, Expr::Literal(Scalar::Bool(b)) if *b == value)
}

fn simplify_node(arena: &mut PlanArena, node: PlanNode) -> Result<NodeId> {
    match node {
        PlanNode::Filter { input, predicate } => {
            let predicate = simplify_expr(predicate, arena.schema(input)?);
            if is_bool(&predicate, true) {
                return Ok(input);
            }
            arena.add(PlanNode::Filter { input, predicate })
        }
        PlanNode::Scan {
            source,
            projection,
            predicate,
            limit,
        } => {
            let full = source.schema();
            let predicate = predicate
                .map(|p| simplify_expr(p, &full))
                .filter(|p| !is_bool(p, true));
            arena.add(PlanNode::Scan {
                source,
                projection,
                predicate,
                limit,
            })
        }
        PlanNode::Select { input, exprs } => {
            let schema = arena.schema(input)?;
            let exprs: Vec<Expr> = exprs.into_iter().map(|e| keep_name(e, schema, false)).collect();
            let names = schema.names();
            let identity = exprs.len() == names.len()
                && exprs
                    .iter()
                    .zip(names.iter())
                    .all(|(e, n)| e.as_column() == Some(n.as_str()));
            if identity {
                return Ok(input);
            }
            arena.add(PlanNode::Select { input, exprs })
        }
        PlanNode::Aggregate {
            input,
            keys,
            aggs,
            maintain_order,
        } => {
            let schema = arena.schema(input)?;
            let aggs = aggs.into_iter().map(|e| keep_name(e, schema, true)).collect();
            arena.add(PlanNode::Aggregate {
                input,
                keys,
                aggs,
                maintain_order,
            })
        }
        other => arena.add(other),
    }
}

/// Simplify an output expression without changing its name. Inside an
/// aggregation only the argument is rewritten.
fn keep_name(e: Expr, schema: &Schema, in_agg: bool) -> Expr {
    let name = e.output_name();
    let mut aliased = false;
    let mut inner = e;
    while let Expr::Alias { expr, .. } = inner {
        aliased = true;
        inner = *expr;
    }
    let rewritten = match inner {
        Expr::Agg {
            func,
            input: Some(arg),
        } if in_agg => Expr::Agg {
            func,
            input: Some(Box::new(simplify_expr(*arg, schema))),
        },
        other if in_agg => other,
        other => simplify_expr(other, schema),
    };
    if aliased || rewritten.output_name() != name {
        rewritten.alias(name)
    } else {
        rewritten
    }
}

/// Fold `e`, keeping its static type.
fn simplify_expr(e: Expr, schema: &Schema) -> Expr {
    let folded = e.clone().transform(&mut fold);
    if folded == e {
        return e;
    }
    let (Ok(before), Ok(after)) = (e.data_type(schema), folded.data_type(schema)) else {
        return e;
    };
    if before == after {
        folded
    } else if can_cast(after, before) {
        folded.cast(before)
    } else {
        e
    }
}

fn fold(e: Expr) -> Expr {
    match e {
        Expr::Binary { left, op, right } => {
            if let (Some(l), Some(r)) = (left.as_literal(), right.as_literal()) {
                if let Ok(v) = kernels::binary(op, l, r) {
                    return Expr::Literal(v);
                }
            }
            match op {
                BinaryOp::And if is_bool(&left, false) || is_bool(&right, false) => {
                    Expr::Literal(Scalar::Bool(false))
                }
                BinaryOp::And if is_bool(&left, true) => *right,
                BinaryOp::And if is_bool(&right, true) => *left,
                BinaryOp::Or if is_bool(&left, true) || is_bool(&right, true) => {
                    Expr::Literal(Scalar::Bool(true))
                }
                BinaryOp::Or if is_bool(&left, false) => *right,
                BinaryOp::Or if is_bool(&right, false) => *left,
                _ => Expr::Binary { left, op, right },
            }
        }
        Expr::Unary {
            op: UnaryOp::Not,
            expr,
        } => match *expr {
            Expr::Unary {
                op: UnaryOp::Not,
                expr: inner,
            } => *inner,
            other => fold_unary(UnaryOp::Not, other),
        },
        Expr::Unary { op, expr } => fold_unary(op, *expr),
        Expr::Function { func, args } => {
            let literals: Option<Vec<Scalar>> =
                args.iter().map(|a| a.as_literal().cloned()).collect();
            match literals.map(|vals| kernels::function(func, &vals)) {
                Some(Ok(v)) => Expr::Literal(v),
                _ => Expr::Function { func, args },
            }
        }
        Expr::Cast { expr, to } => match expr.as_literal().map(|v| kernels::cast(v, to)) {
            Some(Ok(v)) => Expr::Literal(v),
            _ => Expr::Cast { expr, to },
        },
        other => other,
    }
}

fn fold_unary(op: UnaryOp, expr: Expr) -> Expr {
    match expr.as_literal().map(|v| kernels::unary(op, v)) {
        Some(Ok(v)) => Expr::Literal(v),
        _ => Expr::Unary {
            op,
            expr: Box::new(expr),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LazyFrame;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_io::MemorySource;

    fn frame() -> LazyFrame {
        let src = MemorySource::from_columns(
            "t",
            vec![
                ("id", (0..4).map(Scalar::I64).collect()),
                ("flag", (0..4).map(|i| Scalar::Bool(i % 2 == 0)).collect()),
            ],
        )
        .unwrap();
        LazyFrame::scan(src).unwrap()
    }

    #[test]
    fn folds_constants_inside_predicates() {
        let lf = frame()
            .filter(col("id").gt(lit(1i64) + lit(2i64)).and(lit(true)))
            .unwrap();
        let plan = Simplify.apply(&lf.logical_plan().unwrap()).unwrap();
        let PlanNode::Filter { predicate, .. } = plan.node(plan.roots[0]).unwrap() else {
            panic!("expected filter");
        };
        assert_eq!(predicate, &col("id").gt(lit(3i64)));
    }

    #[test]
    fn always_true_filter_and_identity_select_disappear() {
        let lf = frame()
            .filter(lit(1i64).lt(lit(2i64)))
            .unwrap()
            .select([col("id"), col("flag")])
            .unwrap();
        let plan = Simplify.apply(&lf.logical_plan().unwrap()).unwrap();
        assert!(matches!(plan.node(plan.roots[0]).unwrap(), PlanNode::Scan { .. }));
        assert_eq!(plan.arena.len(), 1);
    }

    #[test]
    fn output_names_and_types_survive() {
        let lf = frame()
            .select([
                (lit(1i64) + lit(2i64)).alias("three"),
                lit(true).and(col("flag")),
                col("flag").not().not().alias("same"),
            ])
            .unwrap();
        let before = lf.logical_plan().unwrap();
        let after = Simplify.apply(&before).unwrap();
        assert!(after.root_schemas().unwrap()[0].same_shape(&before.root_schemas().unwrap()[0]));
        let PlanNode::Select { exprs, .. } = after.node(after.roots[0]).unwrap() else {
            panic!("expected select");
        };
        assert_eq!(exprs[0], lit(3i64).alias("three"));
        assert_eq!(exprs[1], col("flag").alias("literal"));
        assert_eq!(exprs[2], col("flag").alias("same"));

        let again = Simplify.apply(&after).unwrap();
        assert_eq!(again.fingerprint().unwrap(), after.fingerprint().unwrap());
    }
}
