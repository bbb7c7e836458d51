//! Physical plan: one operator per logical node, in dependency order.
//!
//! Node ids are the logical ids of the (optimized) plan the physical plan
//! was lowered from, so errors and reports can name plan nodes directly.

use std::collections::HashMap;
use std::sync::Arc;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::{Error, Result};
use lazyplan_core::hash::Hash256;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::PlanNode;
use lazyplan_core::schema::Schema;
use lazyplan_operators::aggregate::Aggregate;
use lazyplan_operators::distinct::Distinct;
use lazyplan_operators::filter::Filter;
use lazyplan_operators::join::HashJoin;
use lazyplan_operators::project::Project;
use lazyplan_operators::scan::Scan;
use lazyplan_operators::slice::Slice;
use lazyplan_operators::sort::Sort;
use lazyplan_operators::union::Union;
use lazyplan_operators::{Operator, StreamingSupport};

use crate::cost::{estimate_work, estimate_rows, WorkEstimate};

#[derive(Debug, Clone)]
pub struct PhysicalNode {
    pub id: NodeId,
    pub op: Arc<dyn Operator>,
    pub inputs: Vec<NodeId>,
    pub schema: Schema,
    /// Number of consuming edges (roots count once per occurrence).
    pub consumers: usize,
    pub support: StreamingSupport,
    /// Not materializing, and neither is anything below it.
    pub streaming_eligible: bool,
    pub fingerprint: Hash256,
    pub estimated_rows: u64,
    /// Estimated bytes of operator state held while the node runs.
    pub estimated_state_bytes: u64,
    /// One-line logical description, for `explain`.
    pub label: String,
}

impl PhysicalNode {
    pub fn is_shared(&self) -> bool {
        self.consumers > 1
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    /// Inputs before consumers.
    pub nodes: Vec<PhysicalNode>,
    index: HashMap<NodeId, usize>,
    pub roots: Vec<NodeId>,
    pub fingerprint: Hash256,
    pub work: WorkEstimate,
}

impl PhysicalPlan {
    pub fn node(&self, id: NodeId) -> Result<&PhysicalNode> {
        self.index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| Error::Invariant(format!("{id} is not in the physical plan")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes grouped by depth: every node's inputs sit in earlier levels.
    pub fn levels(&self) -> Vec<Vec<NodeId>> {
        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        for node in &self.nodes {
            let d = node
                .inputs
                .iter()
                .filter_map(|i| depth.get(i))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node.id, d);
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(node.id);
        }
        levels
    }

    /// Whether the whole plan can run under the streaming executor without
    /// falling back to batch evaluation anywhere.
    pub fn streaming_eligible(&self) -> bool {
        self.roots
            .iter()
            .all(|r| self.node(*r).map_or(false, |n| n.streaming_eligible))
    }

    /// Sum of every node's estimated operator state.
    pub fn estimated_state_bytes(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.estimated_state_bytes)
            .fold(0, u64::saturating_add)
    }

    pub fn shared_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_shared())
            .map(|n| n.id)
            .collect()
    }
}

fn operator(plan: &LogicalPlan, node: &PlanNode, schema: Schema) -> Result<Arc<dyn Operator>> {
    let op: Arc<dyn Operator> = match node.clone() {
        PlanNode::Scan {
            source,
            projection,
            predicate,
            limit,
        } => Arc::new(Scan {
            source,
            projection,
            predicate,
            limit,
            schema,
        }),
        PlanNode::Filter { predicate, .. } => Arc::new(Filter { predicate, schema }),
        PlanNode::Select { exprs, .. } => Arc::new(Project { exprs, schema }),
        PlanNode::Aggregate {
            keys,
            aggs,
            maintain_order,
            ..
        } => Arc::new(Aggregate {
            keys,
            aggs,
            maintain_order,
            schema,
        }),
        PlanNode::Join {
            left,
            right,
            left_on,
            right_on,
            how,
        } => Arc::new(
            HashJoin::new(
                plan.schema(left)?,
                plan.schema(right)?,
                left_on,
                right_on,
                how,
                schema,
            )
            .map_err(|e| Error::Plan(e.to_string()))?,
        ),
        PlanNode::Sort { by, limit, .. } => Arc::new(Sort { by, limit, schema }),
        PlanNode::Slice { offset, len, .. } => Arc::new(Slice {
            offset,
            len,
            schema,
        }),
        PlanNode::Union { .. } => Arc::new(Union { schema }),
        PlanNode::Distinct { subset, .. } => Arc::new(Distinct { subset, schema }),
    };
    Ok(op)
}

/// Lower every reachable node of `plan` to its operator.
pub fn lower(plan: &LogicalPlan) -> Result<PhysicalPlan> {
    let consumers = plan.consumer_counts()?;
    let rows = estimate_rows(plan)?;
    let mut nodes: Vec<PhysicalNode> = Vec::new();
    let mut index: HashMap<NodeId, usize> = HashMap::new();

    for id in plan.topo_order()? {
        let logical = plan.node(id)?;
        let schema = plan.schema(id)?.clone();
        let op = operator(plan, logical, schema.clone())?;
        let support = op.streaming_support();
        let inputs = logical.inputs();
        let (mut input_rows, mut row_bytes) = (0u64, 0u64);
        for i in &inputs {
            input_rows = input_rows.saturating_add(rows.get(i).copied().unwrap_or(0));
            row_bytes = row_bytes.max(plan.schema(*i)?.estimated_row_width());
        }
        let estimated_state_bytes = op
            .memory_need(input_rows, row_bytes)
            .estimate_live(input_rows);
        let inputs_eligible = inputs
            .iter()
            .all(|i| index.get(i).map_or(false, |&j| nodes[j].streaming_eligible));
        index.insert(id, nodes.len());
        nodes.push(PhysicalNode {
            id,
            op,
            inputs,
            schema,
            consumers: consumers.get(&id).copied().unwrap_or(0),
            support,
            streaming_eligible: inputs_eligible && support != StreamingSupport::Materializing,
            fingerprint: plan.arena.fingerprint(id)?,
            estimated_rows: rows.get(&id).copied().unwrap_or(0),
            estimated_state_bytes,
            label: logical.describe(),
        });
    }

    Ok(PhysicalPlan {
        nodes,
        index,
        roots: plan.roots.clone(),
        fingerprint: plan.fingerprint()?,
        work: estimate_work(plan)?,
    })
}
