//! Test data generation utilities shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;

use lazyplan::prelude::*;

/// Install a fmt subscriber once; `RUST_LOG` selects what is printed.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn status(i: usize) -> &'static str {
    match i % 3 {
        0 => "open",
        1 => "closed",
        _ => "void",
    }
}

/// `orders(id, customer, amount, status)`, `customer` cycling over 50 ids.
pub fn orders(rows: usize) -> MemorySource {
    MemorySource::from_columns(
        "orders",
        vec![
            ("id", (0..rows).map(|i| Scalar::I64(i as i64)).collect()),
            ("customer", (0..rows).map(|i| Scalar::I64((i % 50) as i64)).collect()),
            ("amount", (0..rows).map(|i| Scalar::F64((i % 97) as f64 * 1.5)).collect()),
            ("status", (0..rows).map(|i| Scalar::Str(status(i).into())).collect()),
        ],
    )
    .expect("valid orders table")
}

/// `customers(id, name, region)` for ids `0..n`.
pub fn customers(n: usize) -> MemorySource {
    MemorySource::from_columns(
        "customers",
        vec![
            ("id", (0..n).map(|i| Scalar::I64(i as i64)).collect()),
            ("name", (0..n).map(|i| Scalar::Str(format!("customer-{i}"))).collect()),
            (
                "region",
                (0..n)
                    .map(|i| Scalar::Str(["north", "south", "east", "west"][i % 4].into()))
                    .collect(),
            ),
        ],
    )
    .expect("valid customers table")
}

/// The orders table wrapped so tests can see how it was read.
pub fn counting_orders(rows: usize) -> (SourceRef, std::sync::Arc<lazyplan::io::ScanStats>) {
    let src = CountingSource::new(orders(rows));
    let stats = src.stats();
    (SourceRef::new(src), stats)
}

pub fn orders_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("customer", DataType::Int64, false),
        Field::new("amount", DataType::Float64, true),
        Field::new("status", DataType::Utf8, false),
    ])
}

/// Write the orders table as CSV under `dir`.
pub fn write_orders_csv(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("orders.csv");
    let mut file = fs::File::create(&path).expect("create csv");
    writeln!(file, "id,customer,amount,status").expect("write header");
    for i in 0..rows {
        writeln!(file, "{},{},{},{}", i, i % 50, (i % 97) as f64 * 1.5, status(i))
            .expect("write row");
    }
    path
}

/// Rows in a canonical order, for comparing results whose order is unspecified.
pub fn sorted_rows(batch: &RowBatch) -> Vec<Vec<Scalar>> {
    let mut rows = batch.rows();
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

pub fn engine() -> Engine {
    init_tracing();
    Engine::new(EngineConfig::default().with_chunk_rows(64)).expect("valid engine config")
}
