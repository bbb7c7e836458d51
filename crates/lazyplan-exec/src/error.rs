//! Request-level errors.

use lazyplan_core::id::NodeId;
use lazyplan_operators::OpError;
use lazyplan_planner::OptimizeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The plan could not be merged, lowered or validated.
    #[error("invalid plan: {0}")]
    Build(lazyplan_core::Error),

    #[error(transparent)]
    Optimization(#[from] OptimizeError),

    #[error("{operator} at {node}{}: {cause}", batch_suffix(.batch))]
    Execution {
        node: NodeId,
        operator: &'static str,
        /// Index of the output batch being produced, in streaming mode.
        batch: Option<usize>,
        cause: OpError,
    },

    #[error("memory budget exhausted at {node}: requested {requested} bytes, capacity {capacity}, used {used}")]
    ResourceExhausted {
        node: NodeId,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

fn batch_suffix(batch: &Option<usize>) -> String {
    batch.map(|b| format!(" (batch {b})")).unwrap_or_default()
}

impl From<lazyplan_core::Error> for ExecError {
    fn from(e: lazyplan_core::Error) -> Self {
        match e {
            lazyplan_core::Error::Config(msg) => ExecError::Config(msg),
            other => ExecError::Build(other),
        }
    }
}

impl ExecError {
    /// Classify an operator error, attributing it to `node` unless it
    /// already names the node where it happened.
    pub fn from_op(e: OpError, node: NodeId, operator: &'static str) -> ExecError {
        let (node, operator, batch, cause) = match e.at(node, operator, None) {
            OpError::Located {
                node,
                operator,
                batch,
                cause,
            } => (node, operator, batch, *cause),
            other => (node, operator, None, other),
        };
        match cause.root_cause() {
            OpError::Cancelled => ExecError::Cancelled,
            OpError::ResourceExhausted {
                requested,
                capacity,
                used,
                ..
            } => ExecError::ResourceExhausted {
                node,
                requested: *requested,
                capacity: *capacity,
                used: *used,
            },
            _ => ExecError::Execution {
                node,
                operator,
                batch,
                cause,
            },
        }
    }

    /// The plan node an execution-time error is attributed to.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ExecError::Execution { node, .. } | ExecError::ResourceExhausted { node, .. } => {
                Some(*node)
            }
            _ => None,
        }
    }
}
