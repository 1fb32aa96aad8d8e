use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Malformed merge rule on line {line}: {content:?}")]
    InvalidMerge { line: usize, content: String },

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("max_length must be at least 1")]
    InvalidMaxLength,
}

pub type Result<T> = std::result::Result<T, TokenizerError>;
