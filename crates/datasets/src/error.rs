use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Split `{split}` of corpus `{corpus}/{task}` not found")]
    NotFound {
        corpus: String,
        task: String,
        split: String,
    },

    #[error("Corpus `{corpus}` unavailable: {reason}")]
    Unavailable { corpus: String, reason: String },

    #[error("{path:?}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{path:?}:{line}: missing field `{field}`")]
    MissingField {
        path: PathBuf,
        line: usize,
        field: String,
    },

    #[error("Label {0} is not a sentiment class (expected 0 or 1)")]
    InvalidLabel(i64),

    #[error("Requested {requested} examples from split `{split}` which only has {available}")]
    SubsetTooLarge {
        split: String,
        requested: usize,
        available: usize,
    },

    #[error("Example {index} of split `{split}` has length {found}, expected {expected}")]
    LengthMismatch {
        split: String,
        index: usize,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, DatasetError>;
