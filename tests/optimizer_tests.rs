//! Optimizer behavior observed through whole requests.

mod test_data_gen;

use lazyplan::exec::coordinator::merge;
use lazyplan::planner::{try_optimize, Optimizer, Rule};
use lazyplan::prelude::*;
use test_data_gen::{counting_orders, customers, engine, orders};

#[test]
fn test_head_reduces_rows_read() {
    let (src, stats) = counting_orders(10_000);
    let lf = LazyFrame::scan_ref(src)
        .unwrap()
        .select([col("id"), col("amount")])
        .unwrap()
        .head(10)
        .unwrap();
    let engine = engine();

    let out = engine.collect(&lf, ExecMode::Batch).unwrap();
    assert_eq!(out.num_rows(), 10);
    assert_eq!(stats.rows_read(), 10);
    let request = stats.last_request().unwrap();
    assert_eq!(request.limit, Some(10));
    assert_eq!(
        request.projection,
        Some(vec!["id".to_string(), "amount".to_string()])
    );

    stats.reset();
    let out = engine.collect(&lf, ExecMode::Streaming).unwrap();
    assert_eq!(out.num_rows(), 10);
    assert_eq!(stats.rows_read(), 10);
}

#[test]
fn test_streaming_head_stops_early_behind_a_filter() {
    let (src, stats) = counting_orders(10_000);
    let lf = LazyFrame::scan_ref(src)
        .unwrap()
        .filter(col("status").eq(lit("closed")))
        .unwrap();
    let out = engine().head(&[lf], 20, ExecMode::Streaming).unwrap();
    assert_eq!(out.results[0].num_rows(), 20);
    // The predicate keeps a third of the rows; reading stops a chunk or so
    // after the 20th match.
    assert!(stats.rows_read() <= 128, "read {}", stats.rows_read());
    assert_eq!(stats.last_request().unwrap().limit, Some(20));
}

#[test]
fn test_head_after_group_by_is_not_pushed_below_it() {
    let (src, stats) = counting_orders(1000);
    let lf = LazyFrame::scan_ref(src)
        .unwrap()
        .group_by(["customer"])
        .agg([col("amount").max()])
        .unwrap()
        .head(3)
        .unwrap();
    let out = engine().collect(&lf, ExecMode::Batch).unwrap();
    assert_eq!(out.num_rows(), 3);
    assert_eq!(stats.rows_read(), 1000);
    assert_eq!(stats.last_request().unwrap().limit, None);
}

#[test]
fn test_filter_reaches_the_scan_request() {
    let (src, stats) = counting_orders(100);
    let lf = LazyFrame::scan_ref(src)
        .unwrap()
        .select([col("id"), col("status")])
        .unwrap()
        .filter(col("id").lt(lit(5i64)))
        .unwrap();
    let out = engine().collect(&lf, ExecMode::Batch).unwrap();
    assert_eq!(out.num_rows(), 5);
    let request = stats.last_request().unwrap();
    assert_eq!(request.predicate, Some(col("id").lt(lit(5i64))));
}

#[test]
fn test_optimization_is_idempotent_on_merged_plans() {
    let orders = LazyFrame::scan(orders(100)).unwrap();
    let customers = LazyFrame::scan(customers(10)).unwrap();
    let joined = orders
        .join(&customers, ["customer"], ["id"], JoinType::Left)
        .unwrap()
        .filter(col("region").eq(lit("north")).and(col("amount").gt(lit(3.0))))
        .unwrap();
    let frames = [
        joined.select([col("id"), col("name")]).unwrap().head(4).unwrap(),
        joined
            .group_by(["name"])
            .agg([col("amount").sum()])
            .unwrap(),
        orders.filter(lit(true)).unwrap().tail(2).unwrap(),
    ];
    let plan = merge(&frames).unwrap();
    let config = OptimizerConfig::default();
    let once = try_optimize(&plan, &config).unwrap();
    let twice = try_optimize(&once, &config).unwrap();
    assert_eq!(once.fingerprint().unwrap(), twice.fingerprint().unwrap());
    for (before, after) in plan
        .root_schemas()
        .unwrap()
        .iter()
        .zip(once.root_schemas().unwrap().iter())
    {
        assert!(before.same_shape(after));
    }
}

struct Broken;

impl Rule for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn apply(&self, _plan: &LogicalPlan) -> Result<LogicalPlan> {
        Err(Error::Invariant("rule failed".into()))
    }
}

#[test]
fn test_failing_pass_falls_back_to_the_unoptimized_plan() {
    let lf = LazyFrame::scan(orders(10))
        .unwrap()
        .filter(col("id").gt(lit(4i64)))
        .unwrap();
    let plan = lf.logical_plan().unwrap();
    let optimizer = Optimizer::new(&OptimizerConfig::default()).with_rule(Box::new(Broken));
    assert!(optimizer.try_optimize(&plan).is_err());
    let fallback = optimizer.optimize(&plan);
    assert_eq!(fallback.fingerprint().unwrap(), plan.fingerprint().unwrap());
}

#[test]
fn test_explain_shows_pushdowns_and_sharing() {
    let (src, _) = counting_orders(100);
    let base = LazyFrame::scan_ref(src)
        .unwrap()
        .filter(col("id").lt(lit(50i64)))
        .unwrap();
    let a = base.select([col("id")]).unwrap();
    let b = base.sort([SortKey::desc("amount")]).unwrap();
    let text = engine().explain(&[a, b]).unwrap();
    assert!(text.starts_with("mode: batch-only\n"), "{text}");
    assert!(text.contains("root 0:") && text.contains("root 1:"));
    assert!(text.contains("-> #"), "{text}");
    assert!(text.contains("chunk_rows: 64"));
}
