use thiserror::Error;

/// Errors raised by the training core and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// A network/data pairing whose dimensions don't line up. This is a programming error and
    /// aborts the run.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{len} rows cannot be split evenly into chunks of {size}")]
    IndivisibleBatch { len: usize, size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
