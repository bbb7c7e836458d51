//! Runtime: the `Engine` that turns frames into results.
//!
//! Every request goes through the same steps:
//! - merge the submitted frames into one plan (shared prefixes collapse),
//! - optimize it (falling back to the merged plan if a pass fails),
//! - lower it to operators,
//! - run it in the requested mode under the engine's memory budget.
//!
//! The engine owns the budget and the rayon pool; requests may run
//! concurrently and share both.

use std::sync::Arc;
use std::time::Instant;

use lazyplan_core::config::EngineConfig;
use lazyplan_core::hash::hash_str;
use lazyplan_core::id::RequestId;
use lazyplan_core::types::RowBatch;
use lazyplan_mem::MemoryBudgetImpl;
use lazyplan_operators::ExecContext;
use lazyplan_planner::cost::choose_chunk_rows;
use lazyplan_planner::explain::explain_physical;
use lazyplan_planner::frame::LazyFrame;
use lazyplan_planner::PhysicalPlan;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::coordinator::{self, PreparedPlan};
use crate::error::ExecError;
use crate::metrics::{micros, ExecStats, ExecutionReport};
use crate::shared::SharedResultStore;
use crate::streaming::{ResultStream, StreamingExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Materialize every node once.
    Batch,
    /// Pull bounded chunks through the plan.
    ///
    /// The chunk bound holds for unshared nodes only. A node with several
    /// consumers is materialized in full, under the memory budget, when its
    /// first consumer opens it, so a wide shared subplan costs as much
    /// memory here as in `Batch` mode.
    Streaming,
}

/// Results of a request, one batch per submitted frame, in order.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub results: Vec<RowBatch>,
    pub report: ExecutionReport,
}

/// Engine owns the memory budget, the worker pool and the configuration.
pub struct Engine {
    cfg: EngineConfig,
    budget: MemoryBudgetImpl,
    pool: Arc<rayon::ThreadPool>,
    strict_optimization: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("budget", &self.budget)
            .field("strict_optimization", &self.strict_optimization)
            .finish()
    }
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Self, ExecError> {
        cfg.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.max_parallel_tasks)
            .thread_name(|i| format!("lazyplan-exec-{i}"))
            .build()
            .map_err(|e| ExecError::Config(format!("thread pool: {e}")))?;
        Ok(Self {
            budget: MemoryBudgetImpl::new(cfg.mem_cap_bytes),
            pool: Arc::new(pool),
            strict_optimization: false,
            cfg,
        })
    }

    /// Engine configured from `LAZYPLAN_*` environment variables.
    pub fn from_env() -> Result<Self, ExecError> {
        Self::new(EngineConfig::from_env())
    }

    /// Surface optimizer failures as `ExecError::Optimization` instead of
    /// running the unoptimized plan.
    pub fn strict_optimization(mut self, strict: bool) -> Self {
        self.strict_optimization = strict;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn budget(&self) -> &MemoryBudgetImpl {
        &self.budget
    }

    /// Run one frame and return its rows.
    pub fn collect(&self, frame: &LazyFrame, mode: ExecMode) -> Result<RowBatch, ExecError> {
        let mut out = self.execute(std::slice::from_ref(frame), mode)?;
        out.results
            .pop()
            .ok_or_else(|| ExecError::Invalid("request produced no result".into()))
    }

    /// Run several frames together; a subplan they share is computed once.
    pub fn execute(&self, frames: &[LazyFrame], mode: ExecMode) -> Result<ExecutionOutput, ExecError> {
        self.execute_with(frames, mode, &CancellationToken::new())
    }

    pub fn execute_with(
        &self,
        frames: &[LazyFrame],
        mode: ExecMode,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecError> {
        let request = RequestId::next();
        let started = Instant::now();
        let prepared = self.prepare(frames)?;
        let result = self.run_prepared(request, &prepared, mode, cancel);
        match &result {
            Ok(out) => tracing::info!(
                request = request.get(),
                mode = ?mode,
                roots = frames.len(),
                nodes = out.report.nodes_executed,
                shared = out.report.shared_nodes,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request finished"
            ),
            Err(e) => tracing::info!(
                request = request.get(),
                mode = ?mode,
                roots = frames.len(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request failed"
            ),
        }
        result
    }

    /// The first `n` rows of each frame. The limit is part of the plan, so it
    /// reaches the sources wherever that is safe.
    pub fn head(
        &self,
        frames: &[LazyFrame],
        n: usize,
        mode: ExecMode,
    ) -> Result<ExecutionOutput, ExecError> {
        let limited = frames
            .iter()
            .map(|f| f.head(n))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute(&limited, mode)
    }

    /// Run each frame through its own pipeline, with no sharing between
    /// them. Counters in the report are summed over the runs.
    pub fn execute_independent(
        &self,
        frames: &[LazyFrame],
        mode: ExecMode,
    ) -> Result<ExecutionOutput, ExecError> {
        if frames.is_empty() {
            return Err(ExecError::Invalid("no frames to execute".into()));
        }
        let mut results = Vec::with_capacity(frames.len());
        let mut report: Option<ExecutionReport> = None;
        let mut fingerprints = String::new();
        for frame in frames {
            let out = self.execute(std::slice::from_ref(frame), mode)?;
            fingerprints.push_str(&out.report.fingerprint);
            results.extend(out.results);
            match report.as_mut() {
                Some(r) => r.absorb(&out.report),
                None => report = Some(out.report),
            }
        }
        let mut report =
            report.ok_or_else(|| ExecError::Invalid("no frames to execute".into()))?;
        report.fingerprint = hash_str(&fingerprints).to_hex();
        Ok(ExecutionOutput { results, report })
    }

    /// Lazily stream one frame. Nothing is read until the first pull, except
    /// shared subplans, which are materialized while the stream is built.
    pub fn stream(&self, frame: &LazyFrame) -> Result<ResultStream, ExecError> {
        self.stream_with(frame, CancellationToken::new())
    }

    pub fn stream_with(
        &self,
        frame: &LazyFrame,
        cancel: CancellationToken,
    ) -> Result<ResultStream, ExecError> {
        let request = RequestId::next();
        let prepared = self.prepare(std::slice::from_ref(frame))?;
        let plan = &prepared.physical;
        let ctx = self.context(plan);
        let store = SharedResultStore::new(self.budget.clone());
        let stats = Arc::new(ExecStats::new());
        let root = plan
            .roots
            .first()
            .copied()
            .ok_or_else(|| ExecError::Invalid("plan has no root".into()))?;
        let inner = StreamingExecutor::new(plan, &ctx, &store, cancel.clone(), Arc::clone(&stats))
            .open(root)
            .inspect_err(|_| store.clear())?;
        tracing::info!(
            request = request.get(),
            mode = ?ExecMode::Streaming,
            roots = 1,
            chunk_rows = ctx.chunk_rows,
            eligible = plan.streaming_eligible(),
            "stream opened"
        );
        Ok(ResultStream::new(
            inner,
            plan.node(root)?,
            ctx.chunk_rows,
            cancel,
            stats,
        ))
    }

    /// Render the optimized, merged physical plan the engine would run.
    pub fn explain(&self, frames: &[LazyFrame]) -> Result<String, ExecError> {
        let prepared = self.prepare(frames)?;
        let plan = &prepared.physical;
        let mut out = explain_physical(plan)?;
        out.push_str(&format!(
            "chunk_rows: {}\nfingerprint: {}\n",
            self.chunk_rows(plan),
            plan.fingerprint.short()
        ));
        Ok(out)
    }

    fn prepare(&self, frames: &[LazyFrame]) -> Result<PreparedPlan, ExecError> {
        coordinator::prepare(frames, &self.cfg.optimizer, self.strict_optimization)
    }

    fn chunk_rows(&self, plan: &PhysicalPlan) -> usize {
        self.cfg
            .chunk_rows
            .unwrap_or_else(|| choose_chunk_rows(self.cfg.mem_cap_bytes, &plan.work))
    }

    fn context(&self, plan: &PhysicalPlan) -> ExecContext {
        ExecContext::new(
            self.budget.clone(),
            self.chunk_rows(plan),
            self.cfg.aggregate_partitions,
        )
    }

    fn run_prepared(
        &self,
        request: RequestId,
        prepared: &PreparedPlan,
        mode: ExecMode,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecError> {
        let plan = &prepared.physical;
        let ctx = self.context(plan);
        let stats = Arc::new(ExecStats::new());
        self.budget.reset_peak();

        let started = Instant::now();
        let results = coordinator::run(plan, mode, &ctx, &self.pool, cancel, &stats)?;
        let execute_time = started.elapsed();

        let peak = self.budget.peak_bytes();
        tracing::trace!(request = request.get(), peak_bytes = peak, "memory peak");
        Ok(ExecutionOutput {
            results,
            report: ExecutionReport {
                request_id: request.get(),
                mode,
                roots: plan.roots.len(),
                plan_nodes: plan.len(),
                scans_started: stats.scans_started(),
                nodes_executed: stats.nodes_executed(),
                shared_nodes: plan.shared_nodes().len(),
                batches_produced: stats.batches_produced(),
                peak_memory_bytes: peak,
                chunk_rows: ctx.chunk_rows,
                optimize_micros: micros(prepared.optimize_time),
                execute_micros: micros(execute_time),
                fingerprint: plan.fingerprint.to_hex(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::config::OptimizerConfig;
    use lazyplan_core::expr::{col, lit};
    use lazyplan_core::types::Scalar;
    use lazyplan_io::MemorySource;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().with_chunk_rows(16)).unwrap()
    }

    fn frame() -> LazyFrame {
        let src = MemorySource::from_columns(
            "t",
            vec![
                ("id", (0..100).map(Scalar::I64).collect()),
                ("k", (0..100).map(|i| Scalar::I64(i % 4)).collect()),
            ],
        )
        .unwrap();
        LazyFrame::scan(src).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Engine::new(EngineConfig::default().with_mem_cap(0)).unwrap_err();
        assert!(matches!(err, ExecError::Config(_)));
    }

    #[test]
    fn both_modes_agree() {
        let lf = frame()
            .filter(col("k").eq(lit(1i64)))
            .unwrap()
            .select([col("id"), (col("id") * lit(2i64)).alias("double")])
            .unwrap();
        let engine = engine();
        let batch = engine.collect(&lf, ExecMode::Batch).unwrap();
        let streamed = engine.collect(&lf, ExecMode::Streaming).unwrap();
        assert_eq!(batch.num_rows(), 25);
        assert_eq!(batch.rows(), streamed.rows());
        assert_eq!(engine.budget().used_bytes(), 0);
    }

    #[test]
    fn report_describes_the_request() {
        let base = frame().filter(col("id").gt(lit(10i64))).unwrap();
        let a = base.select([col("id")]).unwrap();
        let b = base.group_by(["k"]).agg([col("id").sum()]).unwrap();
        let out = engine().execute(&[a, b], ExecMode::Batch).unwrap();
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].num_rows(), 89);
        assert_eq!(out.results[1].num_rows(), 4);
        assert_eq!(out.report.roots, 2);
        assert_eq!(out.report.scans_started, 1);
        assert!(out.report.shared_nodes >= 1);
        assert_eq!(out.report.fingerprint.len(), 64);
    }

    #[test]
    fn explain_mentions_mode_and_chunking() {
        let lf = frame().head(5).unwrap();
        let text = engine().explain(&[lf]).unwrap();
        assert!(text.starts_with("mode: streaming-eligible\n"));
        assert!(text.contains("chunk_rows: 16\n"));
    }

    #[test]
    fn independent_runs_do_not_share() {
        let base = frame().filter(col("id").gt(lit(10i64))).unwrap();
        let a = base.select([col("id")]).unwrap();
        let b = base.select([col("k")]).unwrap();
        let engine = Engine::new(
            EngineConfig::default().with_optimizer(OptimizerConfig::none()),
        )
        .unwrap();
        let merged = engine.execute(&[a.clone(), b.clone()], ExecMode::Batch).unwrap();
        let separate = engine.execute_independent(&[a, b], ExecMode::Batch).unwrap();
        assert_eq!(merged.report.scans_started, 1);
        assert_eq!(separate.report.scans_started, 2);
        assert_eq!(merged.results, separate.results);
    }
}
