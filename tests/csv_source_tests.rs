//! End-to-end over a CSV file.

mod test_data_gen;

use lazyplan::prelude::*;
use test_data_gen::{engine, orders_schema, sorted_rows, write_orders_csv};

#[test]
fn test_csv_pipeline_in_both_modes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_orders_csv(dir.path(), 600);
    let src = CsvSource::new(&path, orders_schema()).unwrap();
    let lf = LazyFrame::scan(src)
        .unwrap()
        .filter(col("status").eq(lit("open")).and(col("customer").lt(lit(5i64))))
        .unwrap()
        .group_by(["customer"])
        .agg([count_rows().alias("n"), col("amount").max().alias("top")])
        .unwrap();

    let engine = engine();
    let batch = engine.collect(&lf, ExecMode::Batch).unwrap();
    let streaming = engine.collect(&lf, ExecMode::Streaming).unwrap();
    assert_eq!(batch.column_names(), vec!["customer", "n", "top"]);
    assert_eq!(batch.num_rows(), 5);
    assert_eq!(sorted_rows(&batch), sorted_rows(&streaming));
    // Customer c matches ids c + 50k; status "open" needs id % 3 == 0, so
    // 4 of every 12 ids per customer in 600 rows.
    let n: i64 = batch
        .column("n")
        .unwrap()
        .values
        .iter()
        .filter_map(Scalar::as_i64)
        .sum();
    assert_eq!(n, 20);
}

#[test]
fn test_csv_head_and_explain() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_orders_csv(dir.path(), 100);
    let lf = LazyFrame::scan(CsvSource::new(&path, orders_schema()).unwrap())
        .unwrap()
        .select([col("id"), col("status")])
        .unwrap();
    let engine = engine();
    let out = engine.head(&[lf.clone()], 3, ExecMode::Streaming).unwrap();
    assert_eq!(
        out.results[0].rows(),
        vec![
            vec![Scalar::I64(0), Scalar::Str("open".into())],
            vec![Scalar::I64(1), Scalar::Str("closed".into())],
            vec![Scalar::I64(2), Scalar::Str("void".into())],
        ]
    );
    let text = engine.explain(&[lf]).unwrap();
    assert!(text.contains("orders.csv"), "{text}");
}
