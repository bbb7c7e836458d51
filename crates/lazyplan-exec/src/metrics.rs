//! Per-request counters and the report returned with results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::ExecMode;

/// Counters updated by the executors while a request runs.
#[derive(Debug, Default)]
pub struct ExecStats {
    scans_started: AtomicUsize,
    nodes_executed: AtomicUsize,
    batches_produced: AtomicUsize,
}

impl ExecStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node was evaluated (batch) or opened (streaming).
    pub fn record_node(&self, operator: &str) {
        self.nodes_executed.fetch_add(1, Ordering::Relaxed);
        if operator == "scan" {
            self.scans_started.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batch(&self) {
        self.batches_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scans_started(&self) -> usize {
        self.scans_started.load(Ordering::Relaxed)
    }

    pub fn nodes_executed(&self) -> usize {
        self.nodes_executed.load(Ordering::Relaxed)
    }

    pub fn batches_produced(&self) -> usize {
        self.batches_produced.load(Ordering::Relaxed)
    }
}

/// What a request did. Serializable so callers can log or persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub request_id: u64,
    pub mode: ExecMode,
    pub roots: usize,
    /// Nodes in the physical plan after optimization.
    pub plan_nodes: usize,
    pub scans_started: usize,
    pub nodes_executed: usize,
    /// Nodes read by more than one consumer.
    pub shared_nodes: usize,
    pub batches_produced: usize,
    pub peak_memory_bytes: usize,
    pub chunk_rows: usize,
    pub optimize_micros: u64,
    pub execute_micros: u64,
    /// Hex fingerprint of the executed (merged, optimized) plan.
    pub fingerprint: String,
}

impl ExecutionReport {
    pub fn optimize_time(&self) -> Duration {
        Duration::from_micros(self.optimize_micros)
    }

    pub fn execute_time(&self) -> Duration {
        Duration::from_micros(self.execute_micros)
    }

    /// Fold another request's report into this one: counters add up, the
    /// memory peak is the larger of the two.
    pub fn absorb(&mut self, other: &ExecutionReport) {
        self.roots += other.roots;
        self.plan_nodes += other.plan_nodes;
        self.scans_started += other.scans_started;
        self.nodes_executed += other.nodes_executed;
        self.shared_nodes += other.shared_nodes;
        self.batches_produced += other.batches_produced;
        self.peak_memory_bytes = self.peak_memory_bytes.max(other.peak_memory_bytes);
        self.chunk_rows = self.chunk_rows.max(other.chunk_rows);
        self.optimize_micros += other.optimize_micros;
        self.execute_micros += other.execute_micros;
    }
}

pub(crate) fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(scans: usize, peak: usize) -> ExecutionReport {
        ExecutionReport {
            request_id: 1,
            mode: ExecMode::Batch,
            roots: 1,
            plan_nodes: 3,
            scans_started: scans,
            nodes_executed: 3,
            shared_nodes: 0,
            batches_produced: 0,
            peak_memory_bytes: peak,
            chunk_rows: 1024,
            optimize_micros: 10,
            execute_micros: 20,
            fingerprint: "ab".into(),
        }
    }

    #[test]
    fn stats_count_scans_separately() {
        let stats = ExecStats::new();
        stats.record_node("scan");
        stats.record_node("filter");
        stats.record_batch();
        assert_eq!(stats.scans_started(), 1);
        assert_eq!(stats.nodes_executed(), 2);
        assert_eq!(stats.batches_produced(), 1);
    }

    #[test]
    fn reports_absorb_and_serialize() {
        let mut a = report(1, 100);
        a.absorb(&report(2, 50));
        assert_eq!(a.scans_started, 3);
        assert_eq!(a.roots, 2);
        assert_eq!(a.peak_memory_bytes, 100);
        assert_eq!(a.execute_time(), Duration::from_micros(40));

        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"mode\":\"batch\""));
        let back: ExecutionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
