#![forbid(unsafe_code)]
//! lazyplan-io: data sources.
//!
//! Implementations of `lazyplan_core::source::DataSource`:
//! - [`MemorySource`]: a `RowBatch` held in memory, served in chunks.
//! - [`CsvSource`]: a CSV file read with a declared schema.
//! - [`CountingSource`]: wraps any source and records what was asked of it.

pub mod counting;
pub mod csv_file;
pub mod error;
pub mod memory;

pub use csv_file::CsvSource;
pub use counting::{CountingSource, ScanStats};
pub use error::{Error, Result};
pub use memory::MemorySource;
