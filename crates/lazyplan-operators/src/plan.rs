//! Operator planning surfaces: `Footprint` and `StreamingSupport`.

use serde::{Deserialize, Serialize};

/// Coarse memory model for data flowing through an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    /// Estimated state bytes retained per input row (0 for pipelined operators).
    pub bytes_per_row: u64,
    /// Fixed overhead (hash tables, heaps) regardless of input size.
    pub overhead_bytes: u64,
}

impl Footprint {
    /// Estimate live bytes held by the operator for an input of `rows` rows.
    pub fn estimate_live(&self, rows: u64) -> u64 {
        self.overhead_bytes + self.bytes_per_row.saturating_mul(rows)
    }
}

/// How an operator behaves under the streaming executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingSupport {
    /// Holds no more than the batch in hand.
    Pipelined,
    /// Accumulates guarded state (hash build, groups, seen-set, top-k, tail).
    Blocking,
    /// Needs its whole input at once; runs its batch form under streaming.
    Materializing,
}

impl StreamingSupport {
    pub fn label(&self) -> &'static str {
        match self {
            StreamingSupport::Pipelined => "pipelined",
            StreamingSupport::Blocking => "blocking",
            StreamingSupport::Materializing => "materializing",
        }
    }
}
