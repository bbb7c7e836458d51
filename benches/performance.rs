use criterion::{criterion_group, criterion_main, Criterion};
use lazyplan::prelude::*;

fn orders(rows: usize) -> SourceRef {
    let src = MemorySource::from_columns(
        "orders",
        vec![
            ("id", (0..rows).map(|i| Scalar::I64(i as i64)).collect()),
            ("customer", (0..rows).map(|i| Scalar::I64((i % 500) as i64)).collect()),
            ("amount", (0..rows).map(|i| Scalar::F64((i % 97) as f64)).collect()),
        ],
    )
    .expect("valid bench table");
    SourceRef::new(src)
}

fn bench_modes(c: &mut Criterion) {
    let src = orders(50_000);
    let lf = LazyFrame::scan_ref(src)
        .expect("scan")
        .filter(col("amount").gt(lit(20.0)))
        .expect("filter")
        .group_by(["customer"])
        .agg([col("amount").sum().alias("total"), count_rows().alias("n")])
        .expect("agg");
    let engine = Engine::new(EngineConfig::default()).expect("engine");

    c.bench_function("group_by_batch_50k", |b| {
        b.iter(|| engine.collect(&lf, ExecMode::Batch).expect("batch run"))
    });
    c.bench_function("group_by_streaming_50k", |b| {
        b.iter(|| engine.collect(&lf, ExecMode::Streaming).expect("streaming run"))
    });
}

fn bench_shared_roots(c: &mut Criterion) {
    let src = orders(50_000);
    let base = LazyFrame::scan_ref(src)
        .expect("scan")
        .filter(col("customer").lt(lit(250i64)))
        .expect("filter");
    let frames = vec![
        base.select([col("id")]).expect("select"),
        base.group_by(["customer"])
            .agg([col("amount").max()])
            .expect("agg"),
        base.top_k([SortKey::desc("amount")], 10).expect("top_k"),
    ];
    let engine = Engine::new(EngineConfig::default()).expect("engine");

    c.bench_function("three_roots_merged", |b| {
        b.iter(|| engine.execute(&frames, ExecMode::Batch).expect("merged"))
    });
    c.bench_function("three_roots_independent", |b| {
        b.iter(|| {
            engine
                .execute_independent(&frames, ExecMode::Batch)
                .expect("independent")
        })
    });
}

fn bench_optimize(c: &mut Criterion) {
    let src = orders(10);
    let mut lf = LazyFrame::scan_ref(src).expect("scan");
    for i in 0..20 {
        lf = lf
            .filter(col("id").gt(lit(i as i64)))
            .expect("filter")
            .with_columns([(col("amount") + lit(1.0)).alias("amount")])
            .expect("with_columns");
    }
    let plan = lf.logical_plan().expect("plan");
    let config = OptimizerConfig::default();
    c.bench_function("optimize_40_nodes", |b| {
        b.iter(|| lazyplan::planner::try_optimize(&plan, &config).expect("optimize"))
    });
}

criterion_group!(benches, bench_modes, bench_shared_roots, bench_optimize);
criterion_main!(benches);
