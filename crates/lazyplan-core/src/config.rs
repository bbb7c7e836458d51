//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-pass optimizer toggles. Every pass is safe to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub predicate_pushdown: bool,
    pub projection_pushdown: bool,
    pub slice_pushdown: bool,
    pub common_subplan_elimination: bool,
    pub simplify: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            predicate_pushdown: true,
            projection_pushdown: true,
            slice_pushdown: true,
            common_subplan_elimination: true,
            simplify: true,
        }
    }
}

impl OptimizerConfig {
    /// All passes disabled; the plan is executed as built.
    pub fn none() -> Self {
        Self {
            predicate_pushdown: false,
            projection_pushdown: false,
            slice_pushdown: false,
            common_subplan_elimination: false,
            simplify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard memory cap (in bytes) for materialized results and blocking operator state.
    pub mem_cap_bytes: usize,

    /// Streaming chunk size in rows; derived from the cost model when `None`.
    pub chunk_rows: Option<usize>,

    /// Execution parallelism (rayon pool size for the batch executor).
    pub max_parallel_tasks: usize,

    /// Number of hash partitions for batch-mode grouping aggregation.
    pub aggregate_partitions: usize,

    pub optimizer: OptimizerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            chunk_rows: None,
            max_parallel_tasks: 4,
            aggregate_partitions: 8,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `LAZYPLAN_MEM_CAP_BYTES`: memory cap in bytes
    /// - `LAZYPLAN_CHUNK_ROWS`: streaming chunk size
    /// - `LAZYPLAN_MAX_PARALLEL_TASKS`: max parallel tasks
    /// - `LAZYPLAN_AGGREGATE_PARTITIONS`: hash partitions for aggregation
    /// - `LAZYPLAN_OPTIMIZER`: `none` disables every pass, `all` enables them
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("LAZYPLAN_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("LAZYPLAN_CHUNK_ROWS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.chunk_rows = Some(v);
            }
        }

        if let Ok(s) = std::env::var("LAZYPLAN_MAX_PARALLEL_TASKS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_parallel_tasks = v;
            }
        }

        if let Ok(s) = std::env::var("LAZYPLAN_AGGREGATE_PARTITIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.aggregate_partitions = v;
            }
        }

        if let Ok(s) = std::env::var("LAZYPLAN_OPTIMIZER") {
            match s.trim() {
                "none" | "off" => cfg.optimizer = OptimizerConfig::none(),
                "all" | "on" => cfg.optimizer = OptimizerConfig::default(),
                _ => {}
            }
        }

        cfg
    }

    pub fn with_mem_cap(mut self, bytes: usize) -> Self {
        self.mem_cap_bytes = bytes;
        self
    }

    pub fn with_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = Some(rows);
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.mem_cap_bytes == 0 {
            return Err(Error::Config("mem_cap_bytes must be > 0".into()));
        }
        if self.max_parallel_tasks == 0 {
            return Err(Error::Config("max_parallel_tasks must be > 0".into()));
        }
        if self.aggregate_partitions == 0 {
            return Err(Error::Config("aggregate_partitions must be > 0".into()));
        }
        if self.chunk_rows == Some(0) {
            return Err(Error::Config("chunk_rows must be > 0 when set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_values() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig::default().with_mem_cap(0);
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let bad = EngineConfig::default().with_chunk_rows(0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig::default().with_optimizer(OptimizerConfig::none());
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.optimizer, OptimizerConfig::none());
        assert_eq!(back.mem_cap_bytes, cfg.mem_cap_bytes);
    }
}
