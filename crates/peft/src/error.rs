use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Model(#[from] lora_core::ModelError),

    #[error("Invalid LoRA config: {0}")]
    InvalidConfig(String),

    #[error("Target modules {0:?} not found in the base model")]
    NoTargetModules(Vec<String>),

    #[error(
        "Adapter does not match the base model (missing: {missing:?}, unexpected: {unexpected:?}, wrong shape: {mismatched:?})"
    )]
    AdapterMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
        mismatched: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, PeftError>;
