use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("Model `{id}` unavailable: {reason}")]
    Unavailable { id: String, reason: String },

    #[error("Unsupported architecture `{0}`, expected gpt2")]
    UnsupportedArchitecture(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Checkpoint is missing tensors: {}", .0.join(", "))]
    MissingWeights(Vec<String>),

    #[error("Tensor `{name}` has shape {found:?}, model expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },

    #[error("Cannot classify a batch of {0} sequences without a pad_token_id")]
    MissingPadToken(i64),

    #[error("Input has {found} positions but the model supports at most {max}")]
    SequenceTooLong { found: i64, max: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
