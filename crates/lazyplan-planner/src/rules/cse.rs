//! Common subplan elimination: structurally identical subplans collapse into
//! one node, which then has several consumers and executes once.

use lazyplan_core::arena::LogicalPlan;
use lazyplan_core::error::Result;

use crate::optimizer::Rule;

#[derive(Debug, Default)]
pub struct CommonSubplanElimination;

impl Rule for CommonSubplanElimination {
    fn name(&self) -> &'static str {
        "common_subplan_elimination"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.interned()
    }
}
