//! Index-addressed plan storage (the logical DAG).
//!
//! Nodes only reference inputs that were added before them, so every arena is
//! acyclic and ascending `NodeId` order is a valid topological order. Each
//! slot caches the node's output schema and structural fingerprint.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hash::{hash_node, Hash256};
use crate::id::NodeId;
use crate::plan::PlanNode;
use crate::schema::Schema;

#[derive(Debug, Clone)]
struct Slot {
    node: PlanNode,
    schema: Schema,
    fingerprint: Hash256,
}

#[derive(Debug, Clone, Default)]
pub struct PlanArena {
    slots: Vec<Slot>,
}

/// Fingerprint to node map used to collapse structurally identical subplans.
#[derive(Debug, Clone, Default)]
pub struct StructuralInterner {
    seen: HashMap<Hash256, NodeId>,
}

impl StructuralInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| Error::Invariant(format!("{id} is not in this arena")))
    }

    pub fn node(&self, id: NodeId) -> Result<&PlanNode> {
        Ok(&self.slot(id)?.node)
    }

    pub fn schema(&self, id: NodeId) -> Result<&Schema> {
        Ok(&self.slot(id)?.schema)
    }

    pub fn fingerprint(&self, id: NodeId) -> Result<Hash256> {
        Ok(self.slot(id)?.fingerprint)
    }

    /// Validate `node` against its inputs' schemas and append it.
    pub fn add(&mut self, node: PlanNode) -> Result<NodeId> {
        let (schema, fingerprint) = self.prepare(&node)?;
        Ok(self.push(node, schema, fingerprint))
    }

    /// Like `add`, but returns an existing structurally identical node if any.
    pub fn intern(&mut self, node: PlanNode, interner: &mut StructuralInterner) -> Result<NodeId> {
        let (schema, fingerprint) = self.prepare(&node)?;
        if let Some(&existing) = interner.seen.get(&fingerprint) {
            return Ok(existing);
        }
        let id = self.push(node, schema, fingerprint);
        interner.seen.insert(fingerprint, id);
        Ok(id)
    }

    fn prepare(&self, node: &PlanNode) -> Result<(Schema, Hash256)> {
        let inputs = node.inputs();
        let mut schemas = Vec::with_capacity(inputs.len());
        let mut hashes = Vec::with_capacity(inputs.len());
        for id in &inputs {
            let slot = self.slot(*id)?;
            schemas.push(&slot.schema);
            hashes.push(slot.fingerprint);
        }
        let schema = node.infer_schema(&schemas)?;
        let fingerprint = node.fingerprint(&hashes)?;
        Ok((schema, fingerprint))
    }

    fn push(&mut self, node: PlanNode, schema: Schema, fingerprint: Hash256) -> NodeId {
        let id = NodeId::from_index(self.slots.len());
        self.slots.push(Slot {
            node,
            schema,
            fingerprint,
        });
        id
    }

    /// Copy the subgraph under `root` from `other`, preserving its sharing.
    pub fn import(&mut self, other: &PlanArena, root: NodeId) -> Result<NodeId> {
        let mut memo = HashMap::new();
        self.copy_from(other, root, &mut memo, &mut |arena, node| arena.add(node))
    }

    /// Copy the subgraph under `root`, reusing nodes already interned.
    pub fn import_dedup(
        &mut self,
        other: &PlanArena,
        root: NodeId,
        interner: &mut StructuralInterner,
    ) -> Result<NodeId> {
        let mut memo = HashMap::new();
        self.copy_from(other, root, &mut memo, &mut |arena, node| {
            arena.intern(node, interner)
        })
    }

    fn copy_from<F>(
        &mut self,
        other: &PlanArena,
        root: NodeId,
        memo: &mut HashMap<NodeId, NodeId>,
        add: &mut F,
    ) -> Result<NodeId>
    where
        F: FnMut(&mut PlanArena, PlanNode) -> Result<NodeId>,
    {
        // Children always precede parents, so one ascending sweep over the
        // reachable set copies every input before its consumers.
        for id in other.reachable(&[root])? {
            if memo.contains_key(&id) {
                continue;
            }
            let node = other.node(id)?;
            let mapped = node
                .inputs()
                .iter()
                .map(|i| {
                    memo.get(i).copied().ok_or_else(|| {
                        Error::Invariant(format!("{i} copied out of order"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let new_id = add(self, node.with_inputs(&mapped)?)?;
            memo.insert(id, new_id);
        }
        memo.get(&root)
            .copied()
            .ok_or_else(|| Error::Invariant(format!("{root} was not copied")))
    }

    /// Nodes reachable from `roots`, in ascending (topological) order.
    pub fn reachable(&self, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut marked = vec![false; self.slots.len()];
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            let slot = self.slot(id)?;
            if std::mem::replace(&mut marked[id.index()], true) {
                continue;
            }
            stack.extend(slot.node.inputs());
        }
        Ok(marked
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(|(i, _)| NodeId::from_index(i))
            .collect())
    }
}

/// An arena plus the ordered output roots of a request.
#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    pub arena: PlanArena,
    pub roots: Vec<NodeId>,
}

impl LogicalPlan {
    pub fn new(arena: PlanArena, roots: Vec<NodeId>) -> Self {
        Self { arena, roots }
    }

    pub fn node(&self, id: NodeId) -> Result<&PlanNode> {
        self.arena.node(id)
    }

    pub fn schema(&self, id: NodeId) -> Result<&Schema> {
        self.arena.schema(id)
    }

    pub fn root_schemas(&self) -> Result<Vec<Schema>> {
        self.roots
            .iter()
            .map(|r| self.arena.schema(*r).cloned())
            .collect()
    }

    /// Reachable nodes, inputs before consumers.
    pub fn topo_order(&self) -> Result<Vec<NodeId>> {
        self.arena.reachable(&self.roots)
    }

    /// Number of consumers per reachable node. A root counts as one consumer
    /// per occurrence in `roots`.
    pub fn consumer_counts(&self) -> Result<HashMap<NodeId, usize>> {
        let order = self.topo_order()?;
        let mut counts: HashMap<NodeId, usize> = order.iter().map(|id| (*id, 0)).collect();
        for id in &order {
            for input in self.arena.node(*id)?.inputs() {
                *counts.entry(input).or_insert(0) += 1;
            }
        }
        for root in &self.roots {
            *counts.entry(*root).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Content hash of the whole plan (roots in order).
    pub fn fingerprint(&self) -> Result<Hash256> {
        let roots = self
            .roots
            .iter()
            .map(|r| self.arena.fingerprint(*r))
            .collect::<Result<Vec<_>>>()?;
        hash_node("plan", &(), &roots)
    }

    /// Rebuild with only reachable nodes.
    pub fn compact(&self) -> Result<LogicalPlan> {
        let mut arena = PlanArena::new();
        let mut memo = HashMap::new();
        let mut roots = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let id = arena.copy_from(&self.arena, *root, &mut memo, &mut |a, n| a.add(n))?;
            roots.push(id);
        }
        Ok(LogicalPlan::new(arena, roots))
    }

    /// Rebuild with structurally identical subplans collapsed.
    pub fn interned(&self) -> Result<LogicalPlan> {
        let mut arena = PlanArena::new();
        let mut interner = StructuralInterner::new();
        let roots = self
            .roots
            .iter()
            .map(|r| arena.import_dedup(&self.arena, *r, &mut interner))
            .collect::<Result<Vec<_>>>()?;
        Ok(LogicalPlan::new(arena, roots))
    }
}
