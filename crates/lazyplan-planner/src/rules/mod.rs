//! Optimizer passes.
//!
//! The three pushdown passes are top-down rewrites into a fresh arena: each
//! carries pending state (predicates, required columns, a row limit) from a
//! consumer to its input. A node with more than one consumer is a barrier:
//! it is rewritten once with empty state and whatever is pending stays above
//! it, so every consumer keeps seeing the same shared node.

mod cse;
mod predicate_pushdown;
mod projection_pushdown;
mod simplify;
mod slice_pushdown;

use std::collections::HashMap;

use lazyplan_core::arena::{LogicalPlan, PlanArena};
use lazyplan_core::error::Result;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::PlanNode;
use lazyplan_core::schema::Schema;

pub use cse::CommonSubplanElimination;
pub use predicate_pushdown::PredicatePushdown;
pub use projection_pushdown::ProjectionPushdown;
pub use simplify::Simplify;
pub use slice_pushdown::SlicePushdown;

/// Old plan, consumer counts, and the arena being built.
pub(crate) struct Rewriter<'a> {
    pub old: &'a LogicalPlan,
    consumers: HashMap<NodeId, usize>,
    pub arena: PlanArena,
    shared: HashMap<NodeId, NodeId>,
}

impl<'a> Rewriter<'a> {
    pub fn new(old: &'a LogicalPlan) -> Result<Self> {
        Ok(Self {
            old,
            consumers: old.consumer_counts()?,
            arena: PlanArena::new(),
            shared: HashMap::new(),
        })
    }

    pub fn is_shared(&self, id: NodeId) -> bool {
        self.consumers.get(&id).copied().unwrap_or(0) > 1
    }

    pub fn node(&self, id: NodeId) -> Result<PlanNode> {
        Ok(self.old.node(id)?.clone())
    }

    pub fn old_schema(&self, id: NodeId) -> Result<&'a Schema> {
        self.old.schema(id)
    }

    pub fn new_schema(&self, id: NodeId) -> Result<&Schema> {
        self.arena.schema(id)
    }

    pub fn add(&mut self, node: PlanNode) -> Result<NodeId> {
        self.arena.add(node)
    }
}

/// Shared driver of the pushdown passes.
pub(crate) trait TopDown<'a> {
    /// Pending state; `Default` means nothing to push.
    type State: Default;

    fn rewriter(&mut self) -> &mut Rewriter<'a>;

    /// Rewrite a node that only this path consumes.
    fn descend(&mut self, old: NodeId, state: Self::State) -> Result<NodeId>;

    /// Apply state that could not pass a barrier on top of the rewritten node.
    fn settle(&mut self, new: NodeId, state: Self::State) -> Result<NodeId>;

    fn visit(&mut self, old: NodeId, state: Self::State) -> Result<NodeId> {
        if !self.rewriter().is_shared(old) {
            return self.descend(old, state);
        }
        let new = match self.rewriter().shared.get(&old) {
            Some(&new) => new,
            None => {
                let new = self.descend(old, Self::State::default())?;
                self.rewriter().shared.insert(old, new);
                new
            }
        };
        self.settle(new, state)
    }

    fn run(&mut self) -> Result<LogicalPlan> {
        let roots = self.rewriter().old.roots.clone();
        let mut new_roots = Vec::with_capacity(roots.len());
        for root in roots {
            new_roots.push(self.visit(root, Self::State::default())?);
        }
        let arena = std::mem::take(&mut self.rewriter().arena);
        Ok(LogicalPlan::new(arena, new_roots))
    }
}
