//! Coarse cost model: row estimates per node and streaming chunk sizing.
//!
//! Estimates come from `DataSource::row_count_hint` and fixed selectivity
//! heuristics. A source without a hint counts as zero rows, which makes
//! `choose_chunk_rows` fall back to its default. Nothing here affects
//! results, only batch sizes and `explain` output.

use std::collections::HashMap;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;
use lazyplan_core::expr::{BinaryOp, Expr, UnaryOp};
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::{JoinType, PlanNode};
use lazyplan_core::types::Scalar;
use serde::{Deserialize, Serialize};

/// Rows per chunk when nothing is known about the input.
pub const DEFAULT_CHUNK_ROWS: usize = 4096;
pub const MIN_CHUNK_ROWS: usize = 16;
pub const MAX_CHUNK_ROWS: usize = 64 * 1024;

/// Whole-plan totals used to size streaming chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkEstimate {
    /// Rows produced by all nodes together.
    pub total_rows: u64,
    /// Estimated bytes of those rows.
    pub total_bytes: u64,
    /// Widest node fan-in (join = 2, union = number of inputs).
    pub max_fan_in: u32,
}

/// Fraction of rows a predicate keeps.
fn selectivity(expr: &Expr) -> f64 {
    match expr.unaliased() {
        Expr::Literal(Scalar::Bool(true)) => 1.0,
        Expr::Literal(_) => 0.0,
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => selectivity(left) * selectivity(right),
            BinaryOp::Or => {
                let (a, b) = (selectivity(left), selectivity(right));
                a + b - a * b
            }
            BinaryOp::Eq => 0.1,
            BinaryOp::NotEq => 0.9,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => 0.33,
            _ => 0.5,
        },
        Expr::Unary { op, expr } => match op {
            UnaryOp::IsNull => 0.05,
            UnaryOp::IsNotNull => 0.95,
            UnaryOp::Not => 1.0 - selectivity(expr),
            UnaryOp::Neg => 0.5,
        },
        _ => 0.5,
    }
}

fn scaled(rows: u64, factor: f64) -> u64 {
    (rows as f64 * factor) as u64
}

fn join_rows(left: u64, right: u64, how: JoinType) -> u64 {
    match how {
        JoinType::Inner => {
            // Somewhere between one-to-one and many-to-many.
            let geometric = (left as f64 * right as f64).sqrt() as u64;
            geometric.max(1).min(left.min(right))
        }
        JoinType::Left => scaled(left, 1.2),
        JoinType::Semi | JoinType::Anti => scaled(left, 0.5),
    }
}

fn group_rows(input: u64, keys: usize) -> u64 {
    if keys == 0 {
        return 1;
    }
    let factor = match keys {
        1 => 0.1,
        2 => 0.25,
        3 => 0.4,
        _ => 0.5,
    };
    scaled(input, factor).max(1).min(input)
}

/// Estimated output rows of every reachable node.
pub fn estimate_rows(plan: &LogicalPlan) -> Result<HashMap<NodeId, u64>> {
    let mut rows: HashMap<NodeId, u64> = HashMap::new();
    for id in plan.topo_order()? {
        let input = |i: NodeId| rows.get(&i).copied().unwrap_or(0);
        let out = match plan.node(id)? {
            PlanNode::Scan {
                source,
                predicate,
                limit,
                ..
            } => {
                let base = source.row_count_hint().unwrap_or(0) as u64;
                let filtered = match predicate {
                    Some(p) => scaled(base, selectivity(p)),
                    None => base,
                };
                limit.map_or(filtered, |l| filtered.min(l as u64))
            }
            PlanNode::Filter { input: i, predicate } => scaled(input(*i), selectivity(predicate)),
            PlanNode::Select { input: i, .. } => input(*i),
            PlanNode::Aggregate { input: i, keys, .. } => group_rows(input(*i), keys.len()),
            PlanNode::Join {
                left, right, how, ..
            } => join_rows(input(*left), input(*right), *how),
            PlanNode::Sort { input: i, limit, .. } => {
                limit.map_or(input(*i), |l| input(*i).min(l as u64))
            }
            PlanNode::Slice { input: i, offset, len } => {
                let available = if *offset >= 0 {
                    input(*i).saturating_sub(*offset as u64)
                } else {
                    input(*i)
                };
                available.min(*len as u64)
            }
            PlanNode::Union { inputs } => inputs.iter().map(|i| input(*i)).sum(),
            PlanNode::Distinct { input: i, subset } => {
                let cols = match subset {
                    Some(cols) => cols.len(),
                    None => plan.schema(*i)?.len(),
                };
                group_rows(input(*i), cols)
            }
        };
        rows.insert(id, out);
    }
    Ok(rows)
}

/// Totals over the reachable plan; a shared node is counted once.
pub fn estimate_work(plan: &LogicalPlan) -> Result<WorkEstimate> {
    let rows = estimate_rows(plan)?;
    let mut work = WorkEstimate {
        max_fan_in: 1,
        ..WorkEstimate::default()
    };
    for id in plan.topo_order()? {
        let n = rows.get(&id).copied().unwrap_or(0);
        work.total_rows = work.total_rows.saturating_add(n);
        work.total_bytes = work
            .total_bytes
            .saturating_add(n.saturating_mul(plan.schema(id)?.estimated_row_width()));
        let fan_in = plan.node(id)?.inputs().len() as u32;
        work.max_fan_in = work.max_fan_in.max(fan_in);
    }
    Ok(work)
}

/// Streaming chunk size for a memory cap.
///
/// Targets `mem_cap / (3 * max_fan_in + 1)` bytes per chunk so that every
/// input of the widest node can hold a few chunks at once.
pub fn choose_chunk_rows(mem_cap_bytes: usize, work: &WorkEstimate) -> usize {
    let k = 3.0;
    let fan_in = (work.max_fan_in as f64).max(1.0);
    let target_bytes = (mem_cap_bytes as f64 / (k * fan_in + 1.0)).max(1.0);

    let rows = if work.total_bytes > 0 && work.total_rows > 0 {
        let bytes_per_row = (work.total_bytes as f64 / work.total_rows as f64).max(1.0);
        (target_bytes / bytes_per_row) as usize
    } else {
        DEFAULT_CHUNK_ROWS
    };
    rows.clamp(MIN_CHUNK_ROWS, MAX_CHUNK_ROWS)
}
