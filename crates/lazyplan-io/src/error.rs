use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("parse error in column '{column}' at row {row}: {message}")]
    Parse {
        column: String,
        row: usize,
        message: String,
    },

    #[error("source schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Core(#[from] lazyplan_core::Error),
}

impl From<Error> for lazyplan_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(inner) => inner,
            other => lazyplan_core::Error::Source(other.to_string()),
        }
    }
}
