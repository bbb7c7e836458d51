//! Indented text rendering of logical and physical plans.
//!
//! A node with several consumers is printed in full the first time it is
//! reached and as a `-> #id` reference afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;
use lazyplan_core::id::NodeId;

use crate::physical::PhysicalPlan;

struct Tree<'a, F> {
    out: String,
    printed: HashSet<NodeId>,
    consumers: &'a HashMap<NodeId, usize>,
    line: F,
}

impl<'a, F> Tree<'a, F>
where
    F: FnMut(NodeId) -> Result<(String, Vec<NodeId>)>,
{
    fn render(&mut self, id: NodeId, depth: usize) -> Result<()> {
        let indent = "  ".repeat(depth);
        let shared = self.consumers.get(&id).copied().unwrap_or(0) > 1;
        if shared && !self.printed.insert(id) {
            let _ = writeln!(self.out, "{indent}-> #{}", id.index());
            return Ok(());
        }
        let (text, inputs) = (self.line)(id)?;
        let tag = if shared { format!(" #{}", id.index()) } else { String::new() };
        let _ = writeln!(self.out, "{indent}{text}{tag}");
        for input in inputs {
            self.render(input, depth + 1)?;
        }
        Ok(())
    }
}

fn render_roots<F>(roots: &[NodeId], consumers: &HashMap<NodeId, usize>, line: F) -> Result<String>
where
    F: FnMut(NodeId) -> Result<(String, Vec<NodeId>)>,
{
    let mut tree = Tree {
        out: String::new(),
        printed: HashSet::new(),
        consumers,
        line,
    };
    for (i, root) in roots.iter().enumerate() {
        if roots.len() > 1 {
            let _ = writeln!(tree.out, "root {i}:");
        }
        tree.render(*root, usize::from(roots.len() > 1))?;
    }
    Ok(tree.out)
}

pub fn explain_logical(plan: &LogicalPlan) -> Result<String> {
    let consumers = plan.consumer_counts()?;
    render_roots(&plan.roots, &consumers, |id| {
        let node = plan.node(id)?;
        Ok((node.describe(), node.inputs()))
    })
}

/// Like `explain_logical`, plus operator, streaming support, eligibility,
/// estimated rows and (when non-zero) estimated operator state per node.
pub fn explain_physical(plan: &PhysicalPlan) -> Result<String> {
    let consumers: HashMap<NodeId, usize> =
        plan.nodes.iter().map(|n| (n.id, n.consumers)).collect();
    let mut out = format!(
        "mode: {}\n",
        if plan.streaming_eligible() {
            "streaming-eligible"
        } else {
            "batch-only"
        }
    );
    out.push_str(&render_roots(&plan.roots, &consumers, |id| {
        let node = plan.node(id)?;
        let mut text = format!(
            "{} [{} {}{}, ~{} rows",
            node.label,
            node.op.name(),
            node.support.label(),
            if node.streaming_eligible { "" } else { ", batch" },
            node.estimated_rows
        );
        if node.estimated_state_bytes > 0 {
            let _ = write!(text, ", ~{} state bytes", node.estimated_state_bytes);
        }
        text.push(']');
        Ok((text, node.inputs.clone()))
    })?);
    Ok(out)
}
