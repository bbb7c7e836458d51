use thiserror::Error;

/// Canonical result for core; other crates pass their own error type as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unknown column, type mismatch, misplaced aggregation, duplicate output name.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Join key count/type mismatch, union inputs with differing schemas.
    #[error("Arity error: {0}")]
    Arity(String),

    #[error("Planning error: {0}")]
    Plan(String),

    /// Runtime failure of a scalar kernel (overflow, invalid cast).
    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    // Sources live in other crates; their failures are mapped into this variant.
    #[error("Source error: {0}")]
    Source(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
